//! Outbound transaction push.
//!
//! `PUT {url}/transactions/{txnId}` with `Authorization: Bearer {hs_token}`
//! and the stored transaction body. Any 2xx is an acknowledgement; every
//! other outcome, timeouts included, is a [`DeliveryError`].

use std::time::Duration;

use async_trait::async_trait;
use bridgeline_common::ApplicationService;
use bridgeline_db::StoredTransaction;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use tracing::debug;

use crate::error::DeliveryError;

/// Pushes one transaction to one application service.
#[async_trait]
pub trait TransactionSender: Send + Sync {
    async fn send(
        &self,
        service: &ApplicationService,
        txn: &StoredTransaction,
    ) -> Result<(), DeliveryError>;
}

/// [`TransactionSender`] over HTTP with a shared connection pool.
#[derive(Clone)]
pub struct HttpTransactionSender {
    http: Client,
}

impl HttpTransactionSender {
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("Bridgeline/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    pub fn transaction_url(service: &ApplicationService, txn_id: u64) -> String {
        format!("{}/transactions/{}", service.url, txn_id)
    }
}

#[async_trait]
impl TransactionSender for HttpTransactionSender {
    async fn send(
        &self,
        service: &ApplicationService,
        txn: &StoredTransaction,
    ) -> Result<(), DeliveryError> {
        let url = Self::transaction_url(service, txn.txn_id);
        debug!(appservice = %service.id, txn_id = txn.txn_id, events = txn.event_count, "PUT {}", url);

        let resp = self
            .http
            .put(&url)
            .header(AUTHORIZATION, format!("Bearer {}", service.hs_token))
            .header(CONTENT_TYPE, "application/json")
            .body(txn.body.clone())
            .send()
            .await
            .map_err(|e| DeliveryError::from_reqwest(&service.id, e))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status { appservice: service.id.clone(), status: status.as_u16() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{service_for_users, FakeBridge};

    fn txn(txn_id: u64, body: &str) -> StoredTransaction {
        StoredTransaction {
            txn_id,
            first_seq: 1,
            last_seq: 1,
            last_event_id: "$1".into(),
            event_count: 1,
            body: body.into(),
        }
    }

    #[tokio::test]
    async fn puts_body_with_bearer_token() {
        let bridge = FakeBridge::spawn(0).await;
        let service = service_for_users("irc", &bridge.url, "@irc_.*");
        let sender = HttpTransactionSender::new(Duration::from_secs(5)).unwrap();

        sender.send(&service, &txn(3, r#"{"events":[]}"#)).await.unwrap();

        let received = bridge.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].txn_id, "3");
        assert_eq!(received[0].authorization.as_deref(), Some("Bearer hs_irc"));
        assert_eq!(received[0].body, r#"{"events":[]}"#);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let bridge = FakeBridge::spawn(1).await;
        let service = service_for_users("irc", &bridge.url, "@irc_.*");
        let sender = HttpTransactionSender::new(Duration::from_secs(5)).unwrap();

        let err = sender.send(&service, &txn(1, "{}")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Status { status: 500, .. }));
        sender.send(&service, &txn(1, "{}")).await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_bridge_is_a_network_error() {
        let service = service_for_users("irc", "http://127.0.0.1:1", "@irc_.*");
        let sender = HttpTransactionSender::new(Duration::from_secs(5)).unwrap();
        let err = sender.send(&service, &txn(1, "{}")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Network { .. } | DeliveryError::Timeout { .. }));
    }
}
