use crate::cli::ServeArgs;
use crate::infra::{build_billing_stack, AppState};
use crate::routes::with_billing_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use ses_billing::billing::{BillingError, YearMonth};
use ses_billing::config::AppConfig;
use ses_billing::error::AppError;
use ses_billing::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let anchor =
        YearMonth::containing(Utc::now().date_naive()).map_err(BillingError::from)?;
    let stack = build_billing_stack(&config.billing, anchor).await?;

    let app = with_billing_routes(stack.service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        bucket = %config.billing.document_bucket,
        "ses billing service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
