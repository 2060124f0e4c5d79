//! Masquerade account provisioning.
//!
//! Each application service acts as `@{sender_localpart}:{server}`. At
//! startup that account and a device carrying the service's `as_token` are
//! created in the account store. An account that already exists is success
//! only if this service owns it; the device is never added to anyone else's
//! account.

use async_trait::async_trait;
use bridgeline_common::ApplicationService;
use bridgeline_db::AccountDatabase;
use tracing::info;

use crate::error::ProvisionError;

/// The slice of the identity store provisioning needs.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Create an account owned by `appservice_id`. `false` if it already exists.
    async fn create_account(&self, localpart: &str, appservice_id: &str) -> Result<bool, ProvisionError>;

    /// `None` if no such account, `Some(None)` if it has no owning service.
    async fn account_owner(&self, localpart: &str) -> Result<Option<Option<String>>, ProvisionError>;

    /// Create a device with a fixed access token. `false` if the token is
    /// already registered.
    async fn create_device(
        &self,
        localpart: &str,
        device_id: &str,
        access_token: &str,
        display_name: Option<&str>,
    ) -> Result<bool, ProvisionError>;
}

#[async_trait]
impl AccountStore for AccountDatabase {
    async fn create_account(&self, localpart: &str, appservice_id: &str) -> Result<bool, ProvisionError> {
        Ok(AccountDatabase::create_account(self, localpart, appservice_id).await?)
    }

    async fn account_owner(&self, localpart: &str) -> Result<Option<Option<String>>, ProvisionError> {
        Ok(AccountDatabase::account_owner(self, localpart).await?)
    }

    async fn create_device(
        &self,
        localpart: &str,
        device_id: &str,
        access_token: &str,
        display_name: Option<&str>,
    ) -> Result<bool, ProvisionError> {
        Ok(AccountDatabase::create_device(self, localpart, device_id, access_token, display_name).await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

/// Ensure the masquerade account and its device exist for `service`.
///
/// If the account already exists and belongs to `service`, the device is
/// still ensured so an interrupted earlier run is completed. An account held
/// by anyone else is an error.
pub async fn provision(
    store: &dyn AccountStore,
    service: &ApplicationService,
) -> Result<Provisioned, ProvisionError> {
    let localpart = &service.sender_localpart;
    let created = store.create_account(localpart, &service.id).await?;

    if !created {
        let owner = store.account_owner(localpart).await?.flatten();
        if owner.as_deref() != Some(service.id.as_str()) {
            return Err(ProvisionError::ForeignAccount { localpart: localpart.clone(), owner });
        }
    }

    let device_id = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    store
        .create_device(localpart, &device_id, &service.as_token, Some(localpart))
        .await?;

    if created {
        info!(appservice = %service.id, localpart = %localpart, "Created masquerade account");
        Ok(Provisioned::Created)
    } else {
        Ok(Provisioned::AlreadyExists)
    }
}

/// Provision every service in order, stopping at the first failure.
pub async fn provision_all<'a>(
    store: &dyn AccountStore,
    services: impl IntoIterator<Item = &'a ApplicationService>,
) -> Result<(), ProvisionError> {
    for service in services {
        provision(store, service).await.map_err(|e| ProvisionError::AppService {
            appservice: service.id.clone(),
            source: Box::new(e),
        })?;
    }
    Ok(())
}
