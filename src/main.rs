use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use clinica_pagos::models::pagos::{
    Comprobante, ConsultorioPayment, Payment, PaymentFilters, PaymentMethod, PaymentStatus,
    ResourceId, RevertPayment, TransferPayment,
};
use clinica_pagos::services::{self, pagos::PaymentRequest};
use clinica_pagos::settings::Settings;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "clinica.toml")]
    config: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a transfer payment, uploading the proof of transfer.
    #[command(alias = "create-payment")]
    CreateTransfer {
        #[arg(long)]
        cita: Option<ResourceId>,
        #[arg(long)]
        total: Option<Decimal>,
        /// Legacy amount, used only when --total is not given.
        #[arg(long)]
        monto: Option<Decimal>,
        #[arg(long)]
        comprobante: Option<PathBuf>,
    },
    /// Register a payment made at the clinic.
    CreateConsultorio {
        #[arg(long)]
        cita: Option<ResourceId>,
        #[arg(long)]
        total: Option<Decimal>,
        #[arg(long)]
        monto: Option<Decimal>,
    },
    /// List payments visible to the current user.
    List {
        #[arg(long)]
        paciente: Option<ResourceId>,
        #[arg(long)]
        metodo_pago: Option<PaymentMethod>,
        #[arg(long)]
        estado_pago: Option<PaymentStatus>,
    },
    ListByPatient {
        paciente: ResourceId,
    },
    /// Revert (reject) a payment.
    Revert {
        pago: ResourceId,
        #[arg(long)]
        motivo: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    init_logging(&args.log4rs)?;
    let settings = Settings::new(&args.config).context("Could not load config.")?;

    let payments = services::start_services(&settings).await?;
    let body = run(args.command, &payments).await?;

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn run(command: Command, payments: &mpsc::Sender<PaymentRequest>) -> Result<Value> {
    let (response, rx) = oneshot::channel();
    let mut listing = false;

    let request = match command {
        Command::CreateTransfer {
            cita,
            total,
            monto,
            comprobante,
        } => {
            let comprobante = match comprobante {
                Some(path) => Some(
                    Comprobante::from_path(&path)
                        .await
                        .with_context(|| format!("Could not read {}", path.display()))?,
                ),
                None => None,
            };

            PaymentRequest::CreateTransferPayment {
                payment: TransferPayment {
                    cita_id: cita,
                    monto,
                    total,
                    comprobante,
                },
                response,
            }
        }
        Command::CreateConsultorio { cita, total, monto } => {
            PaymentRequest::CreateConsultorioPayment {
                payment: ConsultorioPayment {
                    cita_id: cita,
                    monto,
                    total,
                },
                response,
            }
        }
        Command::List {
            paciente,
            metodo_pago,
            estado_pago,
        } => {
            listing = true;
            PaymentRequest::ListPayments {
                filters: PaymentFilters {
                    paciente,
                    metodo_pago,
                    estado_pago,
                },
                cancel: Some(cancel_on_ctrl_c()),
                response,
            }
        }
        Command::ListByPatient { paciente } => {
            listing = true;
            PaymentRequest::ListPaymentsByPatient {
                paciente: Some(paciente),
                cancel: Some(cancel_on_ctrl_c()),
                response,
            }
        }
        Command::Revert { pago, motivo } => PaymentRequest::RevertPayment {
            revert: RevertPayment {
                pago_id: Some(pago),
                motivo_reverso: motivo,
            },
            response,
        },
    };

    payments
        .send(request)
        .await
        .map_err(|_| anyhow!("Payment service is not running."))?;
    let body = rx.await??;

    if listing {
        match Payment::list_from_value(&body) {
            Ok(list) => log::info!(
                "{} payments, {} active.",
                list.len(),
                list.iter().filter(|p| p.is_active()).count()
            ),
            Err(e) => log::warn!("Unexpected payment list format: {}", e),
        }
    }

    Ok(body)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, cancelling request.");
            cancel.cancel();
        }
    });

    token
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            log::debug!("Logging initialized from {}.", path);
            Ok(())
        }
        Err(e) => {
            eprintln!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow!("Could not initialize logging: {}", e))
        }
    }
}
