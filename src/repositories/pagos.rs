use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::api::{ApiClient, ApiRequest, MultipartPayload, Transport};
use crate::error::{Error, TransportError, ValidationError};
use crate::models::pagos::{
    effective_total, present, ConsultorioPayload, ConsultorioPayment, PaymentFilters,
    ResourceId, RevertPayload, RevertPayment, TransferPayment,
};

const PAGOS_PATH: &str = "pagos/";
const CREATE_TRANSFER_PATH: &str = "pagos/create/";
const CREATE_CONSULTORIO_PATH: &str = "pagos/consultorio/";

/// Stateless command/query layer over the `pagos/` endpoints.
///
/// Only checks that required ids are present; every other failure comes
/// from the transport as is. No retries, no logging.
#[derive(Clone)]
pub struct PaymentsClient<T = ApiClient> {
    transport: T,
}

impl<T: Transport> PaymentsClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// `POST pagos/create/` as multipart. The backend fixes the method to
    /// TRANSFERENCIA and the state to PENDIENTE, and rejects a second active
    /// transfer payment for the same cita.
    pub async fn create_transfer_payment(&self, payment: TransferPayment) -> Result<Value, Error> {
        let cita = present(payment.cita_id.as_ref()).ok_or(ValidationError::MissingAppointmentId)?;

        let mut form = MultipartPayload::default().text("cita", cita.to_string());
        if let Some(total) = effective_total(payment.total, payment.monto) {
            form = form.text("total", total.to_string());
        }
        if let Some(comprobante) = payment.comprobante {
            form = form.file(
                "comprobante",
                comprobante.file_name,
                comprobante.mime_type,
                comprobante.bytes,
            );
        }

        let request = ApiRequest::post_multipart(CREATE_TRANSFER_PATH, form);
        Ok(self.transport.send(request).await?)
    }

    /// Alias of [`Self::create_transfer_payment`].
    pub async fn create_payment(&self, payment: TransferPayment) -> Result<Value, Error> {
        self.create_transfer_payment(payment).await
    }

    /// `POST pagos/consultorio/` as JSON.
    pub async fn create_consultorio_payment(
        &self,
        payment: ConsultorioPayment,
    ) -> Result<Value, Error> {
        let cita = present(payment.cita_id.as_ref())
            .cloned()
            .ok_or(ValidationError::MissingAppointmentId)?;

        let payload = ConsultorioPayload {
            cita,
            total: effective_total(payment.total, payment.monto),
        };
        let body = serde_json::to_value(&payload).map_err(TransportError::from)?;

        let request = ApiRequest::post_json(CREATE_CONSULTORIO_PATH, body);
        Ok(self.transport.send(request).await?)
    }

    /// `GET pagos/`. With a token, cancelling it drops the in-flight request
    /// and the call fails with [`Error::Cancelled`].
    pub async fn list_payments(
        &self,
        filters: &PaymentFilters,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, Error> {
        let request = ApiRequest::get(PAGOS_PATH).with_query(filters.to_query());

        let token = match cancel {
            Some(token) => token,
            None => return Ok(self.transport.send(request).await?),
        };

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = self.transport.send(request) => Ok(result?),
        }
    }

    pub async fn list_payments_by_patient(
        &self,
        paciente: impl Into<Option<ResourceId>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, Error> {
        let paciente = paciente
            .into()
            .filter(|id| !id.is_missing())
            .ok_or(ValidationError::MissingPatientId)?;

        self.list_payments(&PaymentFilters::by_patient(paciente), cancel)
            .await
    }

    /// `POST pagos/{id}/revertir/`. An empty reason is left out of the body.
    pub async fn revert_payment(&self, revert: RevertPayment) -> Result<Value, Error> {
        let pago = present(revert.pago_id.as_ref()).ok_or(ValidationError::MissingPaymentId)?;

        let payload = RevertPayload::new(revert.motivo_reverso.as_deref());
        let body = serde_json::to_value(&payload).map_err(TransportError::from)?;

        let path = format!("pagos/{}/revertir/", pago.path_segment());
        let request = ApiRequest::post_json(path, body);
        Ok(self.transport.send(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;
    use crate::models::pagos::{Comprobante, PaymentMethod, PaymentStatus};
    use crate::repositories::api::{Method, RequestBody};

    #[derive(Clone)]
    struct RecordingTransport {
        requests: Arc<Mutex<Vec<ApiRequest>>>,
        response: Value,
    }

    impl RecordingTransport {
        fn new(response: Value) -> Self {
            Self {
                requests: Arc::new(Mutex::new(Vec::new())),
                response,
            }
        }

        fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().expect("Lock poisoned").clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, request: ApiRequest) -> Result<Value, TransportError> {
            self.requests.lock().expect("Lock poisoned").push(request);
            Ok(self.response.clone())
        }
    }

    /// Records the request and never answers.
    #[derive(Clone, Default)]
    struct StalledTransport {
        calls: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl Transport for StalledTransport {
        async fn send(&self, _request: ApiRequest) -> Result<Value, TransportError> {
            *self.calls.lock().expect("Lock poisoned") += 1;
            std::future::pending().await
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        async fn send(&self, _request: ApiRequest) -> Result<Value, TransportError> {
            Err(TransportError::Status {
                status: 400,
                body: r#"{"detail":"Ya existe un pago por transferencia para esta cita."}"#
                    .to_string(),
            })
        }
    }

    fn client() -> (PaymentsClient<RecordingTransport>, RecordingTransport) {
        let transport = RecordingTransport::new(json!({"id": 1}));
        (PaymentsClient::new(transport.clone()), transport)
    }

    fn multipart(request: &ApiRequest) -> &MultipartPayload {
        match &request.body {
            RequestBody::Multipart(payload) => payload,
            other => panic!("Expected multipart body, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_ids_never_reach_transport() {
        let (client, transport) = client();

        let result = client
            .create_transfer_payment(TransferPayment::default())
            .await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::MissingAppointmentId))
        ));

        let result = client.create_payment(TransferPayment::new("")).await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::MissingAppointmentId))
        ));

        let result = client
            .create_consultorio_payment(ConsultorioPayment::default())
            .await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::MissingAppointmentId))
        ));

        let result = client.list_payments_by_patient(None::<ResourceId>, None).await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::MissingPatientId))
        ));

        let result = client.revert_payment(RevertPayment::default()).await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::MissingPaymentId))
        ));

        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_zero_ids_count_as_missing() {
        let (client, transport) = client();

        let result = client
            .create_transfer_payment(TransferPayment::new(0u64))
            .await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::MissingAppointmentId))
        ));

        let result = client
            .create_consultorio_payment(ConsultorioPayment::new(0u64))
            .await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::MissingAppointmentId))
        ));

        let result = client.revert_payment(RevertPayment::new(0u64)).await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::MissingPaymentId))
        ));

        let result = client
            .list_payments_by_patient(ResourceId::from("0"), None)
            .await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::MissingPatientId))
        ));

        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_revert_payment_encodes_text_id() {
        let (client, transport) = client();

        client
            .revert_payment(RevertPayment::new("7?x=1"))
            .await
            .expect("Revert should succeed");

        assert_eq!(transport.requests()[0].path, "pagos/7%3Fx%3D1/revertir/");
    }

    #[tokio::test]
    async fn test_transfer_payment_total_wins_over_monto() {
        let (client, transport) = client();

        let payment = TransferPayment::new(1u64)
            .with_monto(Decimal::from(50))
            .with_total(Decimal::from(100));
        let response = client
            .create_transfer_payment(payment)
            .await
            .expect("Payment should be created");
        assert_eq!(response, json!({"id": 1}));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(requests[0].path, "pagos/create/");
        assert_eq!(multipart(&requests[0]).field("cita"), Some("1"));
        assert_eq!(multipart(&requests[0]).field("total"), Some("100"));
    }

    #[tokio::test]
    async fn test_transfer_payment_falls_back_to_monto() {
        let (client, transport) = client();

        let payment = TransferPayment::new(1u64).with_monto(Decimal::from(50));
        client
            .create_transfer_payment(payment)
            .await
            .expect("Payment should be created");

        assert_eq!(multipart(&transport.requests()[0]).field("total"), Some("50"));
    }

    #[tokio::test]
    async fn test_transfer_payment_without_amount_omits_total() {
        let (client, transport) = client();

        let comprobante = Comprobante::new("recibo.jpg", vec![0xff, 0xd8]);
        client
            .create_transfer_payment(TransferPayment::new(3u64).with_comprobante(comprobante))
            .await
            .expect("Payment should be created");

        let requests = transport.requests();
        let payload = multipart(&requests[0]);
        assert_eq!(payload.field("total"), None);
        assert_eq!(payload.fields.len(), 1);

        let file = payload.file.as_ref().expect("Proof should be attached");
        assert_eq!(file.field, "comprobante");
        assert_eq!(file.file_name, "recibo.jpg");
        assert_eq!(file.mime_type, "image/jpeg");
        assert_eq!(file.bytes, vec![0xff, 0xd8]);
    }

    #[tokio::test]
    async fn test_create_payment_matches_transfer_payment() {
        let (client, transport) = client();

        let payment = TransferPayment::new(9u64)
            .with_total(Decimal::from(900))
            .with_comprobante(Comprobante::new("a.pdf", vec![1]));

        client
            .create_payment(payment.clone())
            .await
            .expect("Alias should succeed");
        client
            .create_transfer_payment(payment)
            .await
            .expect("Transfer payment should succeed");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
    }

    #[tokio::test]
    async fn test_consultorio_payment_body() {
        let (client, transport) = client();

        client
            .create_consultorio_payment(
                ConsultorioPayment::new(4u64)
                    .with_monto(Decimal::from(50))
                    .with_total(Decimal::from(100)),
            )
            .await
            .expect("Payment should be created");
        client
            .create_consultorio_payment(ConsultorioPayment::new(4u64))
            .await
            .expect("Payment should be created");

        let requests = transport.requests();
        assert_eq!(requests[0].path, "pagos/consultorio/");
        assert_eq!(
            requests[0].body,
            RequestBody::Json(json!({"cita": 4, "total": "100"}))
        );
        assert_eq!(requests[1].body, RequestBody::Json(json!({"cita": 4})));
    }

    #[tokio::test]
    async fn test_list_payments_passes_filters_as_query() {
        let (client, transport) = client();

        let filters = PaymentFilters {
            paciente: None,
            metodo_pago: Some(PaymentMethod::Transferencia),
            estado_pago: Some(PaymentStatus::Pendiente),
        };
        client
            .list_payments(&filters, None)
            .await
            .expect("Listing should succeed");
        client
            .list_payments(&PaymentFilters::default(), None)
            .await
            .expect("Listing should succeed");

        let requests = transport.requests();
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(requests[0].path, "pagos/");
        assert_eq!(
            requests[0].query,
            vec![
                ("metodo_pago".to_string(), "TRANSFERENCIA".to_string()),
                ("estado_pago".to_string(), "PENDIENTE".to_string()),
            ]
        );
        assert!(requests[1].query.is_empty());
        assert_eq!(requests[1].body, RequestBody::Empty);
    }

    #[tokio::test]
    async fn test_list_by_patient_matches_filtered_list() {
        let (client, transport) = client();

        client
            .list_payments_by_patient(ResourceId::from(42u64), None)
            .await
            .expect("Listing should succeed");
        client
            .list_payments(
                &PaymentFilters {
                    paciente: Some(ResourceId::from(42u64)),
                    ..Default::default()
                },
                None,
            )
            .await
            .expect("Listing should succeed");

        let requests = transport.requests();
        assert_eq!(requests[0], requests[1]);
    }

    #[tokio::test]
    async fn test_pre_cancelled_listing_does_not_return_stale_data() {
        let (client, transport) = client();

        let first = client
            .list_payments(&PaymentFilters::default(), None)
            .await
            .expect("First listing should succeed");
        assert_eq!(first, json!({"id": 1}));

        let token = CancellationToken::new();
        token.cancel();
        let result = client
            .list_payments(&PaymentFilters::default(), Some(&token))
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_listing() {
        let transport = StalledTransport::default();
        let client = PaymentsClient::new(transport.clone());
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            client.list_payments_by_patient(ResourceId::from(1u64), Some(&token)),
        )
        .await
        .expect("Cancelled listing should not hang");

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(*transport.calls.lock().expect("Lock poisoned"), 1);
    }

    #[tokio::test]
    async fn test_uncancelled_token_lets_listing_finish() {
        let (client, _) = client();
        let token = CancellationToken::new();

        let result = client
            .list_payments(&PaymentFilters::default(), Some(&token))
            .await;
        assert_eq!(result.expect("Listing should succeed"), json!({"id": 1}));
    }

    #[tokio::test]
    async fn test_revert_payment_reason_only_when_non_empty() {
        let (client, transport) = client();

        client
            .revert_payment(RevertPayment::new(7u64).with_motivo(""))
            .await
            .expect("Revert should succeed");
        client
            .revert_payment(RevertPayment::new(7u64).with_motivo("error"))
            .await
            .expect("Revert should succeed");

        let requests = transport.requests();
        assert_eq!(requests[0].path, "pagos/7/revertir/");
        assert_eq!(requests[0].body, RequestBody::Json(json!({})));
        assert_eq!(
            requests[1].body,
            RequestBody::Json(json!({"motivo_reverso": "error"}))
        );
    }

    #[tokio::test]
    async fn test_transport_errors_propagate_unchanged() {
        let client = PaymentsClient::new(FailingTransport);

        let result = client
            .create_transfer_payment(TransferPayment::new(1u64))
            .await;

        match result {
            Err(Error::Transport(TransportError::Status { status, body })) => {
                assert_eq!(status, 400);
                assert!(body.contains("Ya existe"));
            }
            other => panic!("Expected status error, got {:?}", other),
        }
    }
}
