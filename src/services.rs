use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::auth::Tokens;
use crate::repositories::api::ApiClient;
use crate::repositories::pagos::PaymentsClient;
use crate::settings::Settings;

pub mod pagos;

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

/// Drains the channel and runs each request on its own task. Requests are
/// not ordered with respect to each other.
#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

pub async fn start_services(
    settings: &Settings,
) -> Result<mpsc::Sender<pagos::PaymentRequest>, anyhow::Error> {
    let (payment_tx, mut payment_rx) = mpsc::channel(512);

    let tokens = Tokens::new(
        settings.api.access_token.clone(),
        settings.api.refresh_token.clone(),
    );
    let api_client = ApiClient::new(&settings.api.base_url, tokens)?;
    log::info!("Using API at {}", api_client.base_url());

    let mut payment_service = pagos::PaymentService::new();
    let handler = pagos::PaymentRequestHandler::new(PaymentsClient::new(api_client));

    log::info!("Starting payment service.");
    tokio::spawn(async move {
        payment_service.run(handler, &mut payment_rx).await;
    });

    Ok(payment_tx)
}
