use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use tokio::signal;
use tracing::{error, info, warn};

use integreatly_operator::OperatorConfig;
use integreatly_operator::health::{HealthState, run_health_server};
use integreatly_operator::run_controller;

const LEASE_NAME: &str = "integreatly-operator-leader";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Time given to an in-flight reconcile after SIGTERM
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    install_crypto_provider()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("integreatly_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    let config = OperatorConfig::from_env();
    info!(
        namespace = %config.watch_namespace,
        installation_type = %config.installation_type,
        version = %config.target_version,
        "starting integreatly-operator"
    );

    let client = Client::try_default().await?;
    let health = Arc::new(HealthState::new());

    // Health checks answer while this replica waits for the lease
    let health_server = tokio::spawn({
        let health = health.clone();
        async move {
            if let Err(e) = run_health_server(health).await {
                error!(error = %e, "health server stopped");
            }
        }
    });

    let lease = installation_lease(client.clone(), &config.watch_namespace);
    acquire_lease(&lease).await;
    let renewal = tokio::spawn(hold_lease(lease));

    let controller = tokio::spawn({
        let health = health.clone();
        async move {
            // Startup setup failing leaves nothing to reconcile
            if let Err(e) = run_controller(client, config, Some(health)).await {
                error!(error = %e, "installation setup failed");
                std::process::exit(1);
            }
        }
    });

    tokio::select! {
        Err(e) = controller => error!(error = %e, "installation controller panicked"),
        Err(e) = health_server => error!(error = %e, "health server panicked"),
        Err(e) = renewal => error!(error = %e, "lease renewal panicked"),
        () = shutdown_signal() => {
            info!("shutdown requested");
            health.set_ready(false).await;
            tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        }
    }

    info!("integreatly-operator stopped");
    Ok(())
}

/// The TLS provider may already be installed when embedded; anything else is fatal
fn install_crypto_provider() -> Result<(), Box<dyn std::error::Error>> {
    let installed = rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_ok();
    if installed || rustls::crypto::CryptoProvider::get_default().is_some() {
        Ok(())
    } else {
        Err("no rustls crypto provider available".into())
    }
}

/// Lease shared by every replica in the operator namespace, held by pod name
fn installation_lease(client: Client, namespace: &str) -> LeaseLock {
    let holder_id = std::env::var("POD_NAME").unwrap_or_else(|_| {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "integreatly-operator".to_string());
        warn!(%host, "POD_NAME unset, holding the lease as the host name");
        host
    });
    info!(%holder_id, %namespace, lease = LEASE_NAME, "joining leader election");

    LeaseLock::new(
        client,
        namespace,
        LeaseLockParams {
            holder_id,
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: LEASE_TTL,
        },
    )
}

async fn acquire_lease(lease: &LeaseLock) {
    loop {
        match lease.try_acquire_or_renew().await {
            Ok(LeaseLockResult::Acquired(_)) => {
                info!("leadership acquired");
                return;
            }
            Ok(_) => info!("another replica holds the lease"),
            Err(e) => warn!(error = %e, "lease request failed"),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }
}

/// Renew until the lease is lost, then exit so the pod rejoins the election
async fn hold_lease(lease: LeaseLock) {
    loop {
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
        match lease.try_acquire_or_renew().await {
            Ok(LeaseLockResult::Acquired(_)) => {}
            Ok(_) => {
                error!("leadership lost");
                std::process::exit(1);
            }
            Err(e) => {
                error!(error = %e, "lease renewal failed");
                std::process::exit(1);
            }
        }
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}
