use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use plugrpc_plugin::{PluginConfig, PluginListener};
use tracing::{info, warn};

use crate::cmd::ServeArgs;
use crate::demo;
use crate::logging::session_span;
use crate::exit::{plugin_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let codec = args.session.codec();
    let listener = PluginListener::bind(&args.path)
        .map_err(|err| plugin_error("bind failed", err))?
        .with_config(PluginConfig::new(codec));

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut sessions = Vec::new();
    while running.load(Ordering::SeqCst) {
        if args.sessions.is_some_and(|limit| sessions.len() >= limit) {
            break;
        }

        let mut server = listener
            .accept()
            .map_err(|err| plugin_error("accept failed", err))?;
        demo::register(&mut server);

        let number = sessions.len() + 1;
        let spawned = thread::Builder::new()
            .name(format!("plugrpc-session-{number}"))
            .spawn(move || {
                let _span = session_span("plugin", number, codec).entered();
                info!("session started");
                match server.serve() {
                    Ok(()) => info!("session ended"),
                    Err(err) => warn!(error = %err, "session failed"),
                }
            })
            .map_err(|err| CliError::new(INTERNAL, format!("failed to spawn session: {err}")))?;
        sessions.push(spawned);
    }

    for session in sessions {
        let _ = session.join();
    }
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
