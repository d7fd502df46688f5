use std::process::exit;

use anyhow::Context;
use args::StartupArguments;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tsgate::{
    config::Config,
    http::{self, auth::HeaderAuthenticator, tls, AppState},
    utils, Gateway,
};

mod args;

fn main() {
    let startup_args = StartupArguments::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(startup_args.default_log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match Config::load(&startup_args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            exit(1);
        }
    };

    if startup_args.check {
        println!("{}: configuration OK", startup_args.config.display());
        return;
    }

    let runtime_result = tokio::runtime::Builder::new_multi_thread().enable_all().build();

    let result = match runtime_result {
        Ok(runtime) => runtime.block_on(async_main(config)),
        Err(err) => {
            eprintln!("Failed to start Tokio runtime: {err}");
            exit(1);
        }
    };

    if let Err(error) = result {
        error!("Program finished with error: {error:#}");
        exit(1);
    }
}

async fn async_main(config: Config) -> anyhow::Result<()> {
    info!("{}", args::get_version_string());

    let server = &config.server;
    let gateway = Gateway::new(config.gateway_policy(), config.backend_selector()?);
    let auth = HeaderAuthenticator::new(&server.identity_header).context("invalid server.identityHeader")?;

    let tls = match server.disable_tls {
        true => {
            warn!("TLS is disabled, serving plain HTTP");
            None
        }
        false => {
            let acceptor = tls::make_acceptor(server.cert_file.as_deref(), server.key_file.as_deref(), &server.gateway_address)
                .context("could not set up TLS")?;
            Some(acceptor)
        }
    };

    let listeners = utils::bind_listeners(&server.listen)
        .await
        .with_context(|| format!("could not listen on {}", server.listen))?;

    for listener in &listeners {
        info!(address = %listener.local_addr()?, tls = tls.is_some(), "listening");
    }

    let router = http::router(AppState::new(gateway, auth, config.connect_settings()));
    http::serve(listeners, router, tls).await?;

    Ok(())
}
