use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook_tokio::Signals;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::info;

use br_dhcp::Control;

/// The lease request a process signal stands for.
pub fn control_for(signal: i32) -> Option<Control> {
    match signal {
        SIGUSR1 => Some(Control::Renew),
        SIGUSR2 => Some(Control::Release),
        SIGTERM | SIGINT => Some(Control::Terminate),
        _ => None,
    }
}

/// Forward process signals to the lease client until it stops listening.
pub async fn forward_signals(control: mpsc::Sender<Control>) -> anyhow::Result<()> {
    let mut signals = Signals::new([SIGUSR1, SIGUSR2, SIGTERM, SIGINT])?;

    while let Some(signal) = signals.next().await {
        let Some(request) = control_for(signal) else {
            continue;
        };
        info!("Received signal {}, requesting {}", signal, request);
        if control.send(request).await.is_err() {
            break;
        }
    }

    Ok(())
}
