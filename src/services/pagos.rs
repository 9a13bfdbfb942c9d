use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{RequestHandler, Service};
use crate::error::Error;
use crate::models::pagos::{
    ConsultorioPayment, PaymentFilters, ResourceId, RevertPayment, TransferPayment,
};
use crate::repositories::api::{ApiClient, Transport};
use crate::repositories::pagos::PaymentsClient;

type PaymentResponse = oneshot::Sender<Result<Value, Error>>;

pub enum PaymentRequest {
    CreateTransferPayment {
        payment: TransferPayment,
        response: PaymentResponse,
    },
    CreatePayment {
        payment: TransferPayment,
        response: PaymentResponse,
    },
    CreateConsultorioPayment {
        payment: ConsultorioPayment,
        response: PaymentResponse,
    },
    ListPayments {
        filters: PaymentFilters,
        cancel: Option<CancellationToken>,
        response: PaymentResponse,
    },
    ListPaymentsByPatient {
        paciente: Option<ResourceId>,
        cancel: Option<CancellationToken>,
        response: PaymentResponse,
    },
    RevertPayment {
        revert: RevertPayment,
        response: PaymentResponse,
    },
}

impl PaymentRequest {
    fn name(&self) -> &'static str {
        match self {
            PaymentRequest::CreateTransferPayment { .. } => "create_transfer_payment",
            PaymentRequest::CreatePayment { .. } => "create_payment",
            PaymentRequest::CreateConsultorioPayment { .. } => "create_consultorio_payment",
            PaymentRequest::ListPayments { .. } => "list_payments",
            PaymentRequest::ListPaymentsByPatient { .. } => "list_payments_by_patient",
            PaymentRequest::RevertPayment { .. } => "revert_payment",
        }
    }
}

pub struct PaymentRequestHandler<T = ApiClient> {
    client: Arc<PaymentsClient<T>>,
}

impl<T> Clone for PaymentRequestHandler<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<T: Transport + 'static> PaymentRequestHandler<T> {
    pub fn new(client: PaymentsClient<T>) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    async fn dispatch(&self, request: PaymentRequest) -> (PaymentResponse, Result<Value, Error>) {
        match request {
            PaymentRequest::CreateTransferPayment { payment, response } => {
                (response, self.client.create_transfer_payment(payment).await)
            }
            PaymentRequest::CreatePayment { payment, response } => {
                (response, self.client.create_payment(payment).await)
            }
            PaymentRequest::CreateConsultorioPayment { payment, response } => {
                (response, self.client.create_consultorio_payment(payment).await)
            }
            PaymentRequest::ListPayments {
                filters,
                cancel,
                response,
            } => {
                let result = self.client.list_payments(&filters, cancel.as_ref()).await;
                (response, result)
            }
            PaymentRequest::ListPaymentsByPatient {
                paciente,
                cancel,
                response,
            } => {
                let result = self
                    .client
                    .list_payments_by_patient(paciente, cancel.as_ref())
                    .await;
                (response, result)
            }
            PaymentRequest::RevertPayment { revert, response } => {
                (response, self.client.revert_payment(revert).await)
            }
        }
    }
}

#[async_trait]
impl<T: Transport + 'static> RequestHandler<PaymentRequest> for PaymentRequestHandler<T> {
    async fn handle_request(&self, request: PaymentRequest) {
        let name = request.name();
        let (response, result) = self.dispatch(request).await;

        match &result {
            Ok(_) => log::debug!("{} succeeded.", name),
            Err(Error::Cancelled) => log::info!("{} cancelled.", name),
            Err(e) => log::warn!("{} failed: {}", name, e),
        }

        // Caller may have stopped waiting.
        let _ = response.send(result);
    }
}

pub struct PaymentService;

impl PaymentService {
    pub fn new() -> Self {
        PaymentService {}
    }
}

impl Default for PaymentService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Transport + 'static> Service<PaymentRequest, PaymentRequestHandler<T>> for PaymentService {}
