use crate::{
    admission::{Admission, AdmissionMetrics},
    lease, reconcile,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::time::Duration;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "proxius",
    about = "Materializes ProxyDefs into ConfigMaps and injects them into workloads"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "proxius=info,warn",
        env = "PROXIUS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// The ProxyDef consulted for workloads that don't name one.
    #[clap(long, default_value = "default")]
    proxydef_name: String,

    #[clap(long, default_value = "5000")]
    admission_lookup_timeout_ms: u64,

    /// How often every ProxyDef is reconciled without a change.
    #[clap(long, default_value = "300")]
    resync_period_secs: u64,

    #[clap(long, default_value = "500")]
    backoff_base_ms: u64,

    #[clap(long, default_value = "300")]
    backoff_max_secs: u64,

    #[clap(long, default_value = "proxius-system")]
    controller_namespace: String,

    #[clap(long, default_value = "proxius-controller")]
    controller_deployment_name: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            proxydef_name,
            admission_lookup_timeout_ms,
            resync_period_secs,
            backoff_base_ms,
            backoff_max_secs,
            controller_namespace,
            controller_deployment_name,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let mut prom = <Registry>::default();
        let controller_metrics =
            reconcile::ControllerMetrics::register(prom.sub_registry_with_prefix("proxydef"));
        let admission_metrics =
            AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        let hostname =
            std::env::var("HOSTNAME").context("Failed to fetch `HOSTNAME` environment variable")?;

        let claims = lease::init(
            &runtime,
            &controller_namespace,
            &controller_deployment_name,
            &hostname,
        )
        .await?;

        let client = runtime.client();
        let controller = reconcile::Controller::new(
            client.clone(),
            reconcile::Params {
                resync: Duration::from_secs(resync_period_secs),
                backoff_base: Duration::from_millis(backoff_base_ms),
                backoff_max: Duration::from_secs(backoff_max_secs),
            },
            claims,
            hostname,
            controller_metrics,
        );
        tokio::spawn(
            controller
                .run(client.clone())
                .instrument(info_span!("proxydefs")),
        );

        let admission = Admission::new(
            client,
            proxydef_name,
            Duration::from_millis(admission_lookup_timeout_ms),
            admission_metrics,
        );
        let runtime = runtime.spawn_server(move || admission);
        info!("Controller started");

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
