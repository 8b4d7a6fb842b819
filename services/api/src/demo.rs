use crate::infra::{build_billing_stack, parse_date, parse_year_month};
use chrono::{Local, NaiveDate};
use clap::Args;
use ses_billing::billing::{
    BatchType, BillingError, ClientCompanyId, CreateBatch, DocumentStatus, GenerateOrders,
    GenerateRequests, PayRequest, YearMonth,
};
use ses_billing::config::AppConfig;
use ses_billing::error::AppError;
use ses_billing::telemetry;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Billing month (YYYY-MM). Defaults to the current month.
    #[arg(long, value_parser = parse_year_month)]
    pub(crate) year_month: Option<YearMonth>,
    /// Stop after the order batch; skip the client request.
    #[arg(long)]
    pub(crate) skip_request: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct SweepArgs {
    /// Sweep date (YYYY-MM-DD). Contracts that ended before it are terminated. Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) as_of: Option<NaiveDate>,
    /// Look-ahead window for the expiring contract listing; overrides the configured default.
    #[arg(long)]
    pub(crate) notice_days: Option<u32>,
}

fn current_month(today: NaiveDate) -> Result<YearMonth, AppError> {
    YearMonth::containing(today).map_err(|err| AppError::from(BillingError::from(err)))
}

pub(crate) async fn run_sweep(args: SweepArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let as_of = args.as_of.unwrap_or_else(|| Local::now().date_naive());
    let notice_days = args
        .notice_days
        .unwrap_or(config.billing.expiry_notice_days);
    let stack = build_billing_stack(&config.billing, current_month(as_of)?).await?;
    let service = &stack.service;

    let expiring = service.contracts_expiring_within(notice_days, as_of).await?;
    println!("Contracts ending within {notice_days} days of {as_of}");
    if expiring.is_empty() {
        println!("  none");
    }
    for contract in &expiring {
        println!(
            "  {} (personnel {}) ends {}",
            contract.contract_number, contract.personnel_id, contract.end_date
        );
    }

    let report = service.sweep_expired_contracts(as_of).await?;
    println!(
        "\nExpiry sweep as of {}: {} terminated, {} status changes, {} failures",
        report.as_of,
        report.terminated.len(),
        report.status_changes.len(),
        report.failures.len()
    );
    for change in &report.status_changes {
        println!(
            "  personnel {}: {} -> {}",
            change.personnel_id,
            change.from.label(),
            change.to.label()
        );
    }
    for failure in &report.failures {
        println!("  ! {}: {}", failure.id, failure.message);
    }
    Ok(())
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let today = Local::now().date_naive();
    let year_month = match args.year_month {
        Some(year_month) => year_month,
        None => current_month(today)?,
    };

    let stack = build_billing_stack(&config.billing, year_month).await?;
    let service = &stack.service;

    println!("SES billing demo for {}", year_month.display_label());

    let generation = service
        .generate_orders_for_month(GenerateOrders {
            year_month: year_month.to_string(),
            ..GenerateOrders::default()
        })
        .await?;
    println!(
        "\nOrders: {} created, {} documents, {} skipped",
        generation.created.len(),
        generation.documents_generated,
        generation.skipped
    );
    for order in &generation.created {
        let details = service.order_details(order.id).await?;
        println!(
            "  {} {} / {} ({}) [{}]",
            order.order_number,
            details.personnel_name,
            details.bp_company_name,
            details.case_title,
            order.status.label()
        );
    }
    for failure in &generation.failures {
        println!("  ! {}: {}", failure.id, failure.message);
    }

    let batch = service
        .create_batch(CreateBatch {
            year_month: year_month.to_string(),
            batch_type: BatchType::All,
            filter_id: None,
            created_by: "demo".to_string(),
            remark: None,
        })
        .await?;
    let sent = service.send_batch(batch.batch.id, "demo").await?;
    let approved = service
        .mark_batch_processed(batch.batch.id, "demo-manager")
        .await?;
    println!(
        "\nBatch {}: {}/{} sent ({}%), {} failures, status {:?}",
        approved.batch.batch_number,
        sent.batch.batch.sent_orders,
        sent.batch.batch.total_orders,
        sent.batch.completion_rate,
        sent.outcome.failure_count(),
        approved.batch.status
    );

    if !args.skip_request {
        let requests = service
            .generate_requests_for_month(GenerateRequests {
                year_month: year_month.to_string(),
                client_company_id: ClientCompanyId(1),
                case_ids: None,
                personnel_ids: None,
            })
            .await?;
        for failure in &requests.failures {
            println!("  ! request {}: {}", failure.id, failure.message);
        }
        let Some(created) = requests.created.first() else {
            println!("\nNo request generated ({} skipped)", requests.skipped);
            return Ok(());
        };
        let id = created.id;
        service.send_request(id, "demo").await?;
        let paid = service
            .pay_request(
                id,
                PayRequest {
                    payment_received_date: Some(today),
                    payment_amount: Some(created.request_amount),
                },
            )
            .await?;
        let details = service.request_details(id).await?;
        println!(
            "\nRequest {} to {}: {} yen incl. {}% tax for {} [{}]",
            details.request_number,
            details.client_company_name,
            details.request_amount.round_dp(0),
            details.tax_rate,
            details.personnel_names,
            paid.status.label()
        );
    }

    println!("\nStored documents");
    for key in stack.storage.keys().await {
        println!("  {}/{key}", config.billing.document_bucket);
    }
    Ok(())
}
