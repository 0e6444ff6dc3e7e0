//! Reference counting for file shares.
//!
//! A share record is either absent (count 0, no row) or present with a
//! positive count. The first reference adopts an existing Azure share or
//! creates one; later references only bump the counter. Dropping the last
//! reference removes the record and, for shares the broker created, may
//! delete the share in Azure.

use std::sync::Arc;

use crate::azure::{GatewayError, StorageAccountGateway};
use crate::broker::domain::FileShare;
use crate::errors::BrokerError;

/// Take one more reference on `share`.
///
/// Only the first reference talks to Azure: `has_share`, then `create_share`
/// when missing and allowed, then `share_url`.
pub(crate) async fn acquire_reference(
    gateway: &dyn StorageAccountGateway,
    account_name: &str,
    share: &mut FileShare,
    allow_create: bool,
) -> Result<(), BrokerError> {
    if share.count > 0 {
        share.count += 1;
        return Ok(());
    }

    let name = share.file_share_name.clone();
    let exists = gateway.has_share(&name).await.map_err(|e| {
        BrokerError::gateway(format!("Failed to check whether the file share {name:?} exists in the storage account {account_name:?}"), e)
    })?;
    if exists {
        share.is_created = false;
    } else {
        if !allow_create {
            return Err(BrokerError::Policy(format!(
                "The file share {name:?} does not exist in the storage account {account_name:?} and the administrator does not allow to create it automatically"
            )));
        }
        gateway
            .create_share(&name)
            .await
            .map_err(|e| BrokerError::gateway(format!("Failed to create the file share {name:?} in the storage account {account_name:?}"), e))?;
        share.is_created = true;
    }

    share.url = gateway
        .share_url(&name)
        .await
        .map_err(|e| BrokerError::gateway(format!("Failed to get the URL of the file share {name:?}"), e))?;
    share.count = 1;
    Ok(())
}

/// What the caller must persist after dropping a reference.
#[derive(Debug)]
pub(crate) enum Release {
    /// Other bindings still use the share; update the record.
    Referenced,
    /// Last reference gone; delete the record. `delete_error` is set when the
    /// Azure share should have been deleted but could not be.
    Unreferenced { delete_error: Option<BrokerError> },
}

/// Drop one reference on `share`. `connect` is only called when the Azure
/// share is to be deleted.
pub(crate) async fn release_reference<F>(share: &mut FileShare, allow_delete: bool, connect: F) -> Release
where
    F: FnOnce() -> Result<Arc<dyn StorageAccountGateway>, GatewayError>,
{
    share.count = share.count.saturating_sub(1);
    if share.count > 0 {
        return Release::Referenced;
    }
    if !(share.is_created && allow_delete) {
        return Release::Unreferenced { delete_error: None };
    }

    let name = &share.file_share_name;
    let context = format!("Failed to delete the file share {name:?}");
    let delete_error = match connect() {
        Ok(gateway) => gateway.delete_share(name).await.err().map(|e| BrokerError::gateway(&context, e)),
        Err(e) => Some(BrokerError::gateway(&context, e)),
    };
    Release::Unreferenced { delete_error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::mock::{InMemoryAzure, Op};
    use crate::azure::{GatewayFactory, StorageAccount};

    fn gateway(azure: &InMemoryAzure) -> Arc<dyn StorageAccountGateway> {
        azure.connect(&StorageAccount::existing("sub", "rg", "acct", true)).expect("gateway")
    }

    #[tokio::test]
    async fn first_reference_adopts_existing_share() -> Result<(), BrokerError> {
        let azure = InMemoryAzure::new().with_share("acct", "s1");
        let mut share = FileShare::absent("i1", "s1");
        acquire_reference(gateway(&azure).as_ref(), "acct", &mut share, false).await?;
        assert_eq!((share.count, share.is_created), (1, false));
        assert_eq!(share.url, "//acct.file.core.windows.net/s1");
        assert_eq!(azure.calls(Op::CreateShare), 0);

        acquire_reference(gateway(&azure).as_ref(), "acct", &mut share, false).await?;
        assert_eq!(share.count, 2);
        assert_eq!(azure.total_calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn missing_share_needs_create_permission() {
        let azure = InMemoryAzure::new().with_account("acct");
        let mut share = FileShare::absent("i1", "s1");
        let err = acquire_reference(gateway(&azure).as_ref(), "acct", &mut share, false).await.expect_err("policy");
        assert!(matches!(err, BrokerError::Policy(_)));
        assert_eq!(share.count, 0);
        assert!(!azure.share_exists("acct", "s1"));
    }

    #[tokio::test]
    async fn last_release_deletes_only_created_shares() {
        let azure = InMemoryAzure::new().with_share("acct", "s1");
        let mut adopted = FileShare { is_created: false, count: 1, ..FileShare::absent("i1", "s1") };
        let out = release_reference(&mut adopted, true, || Ok(gateway(&azure))).await;
        assert!(matches!(out, Release::Unreferenced { delete_error: None }));
        assert!(azure.share_exists("acct", "s1"));

        let mut created = FileShare { is_created: true, count: 2, ..FileShare::absent("i1", "s1") };
        assert!(matches!(release_reference(&mut created, true, || Ok(gateway(&azure))).await, Release::Referenced));
        release_reference(&mut created, true, || Ok(gateway(&azure))).await;
        assert!(!azure.share_exists("acct", "s1"));
    }

    #[tokio::test]
    async fn delete_failure_is_reported_not_raised() {
        let azure = InMemoryAzure::new().with_share("acct", "s1");
        azure.fail(Op::DeleteShare);
        let mut share = FileShare { is_created: true, count: 1, ..FileShare::absent("i1", "s1") };
        let out = release_reference(&mut share, true, || Ok(gateway(&azure))).await;
        assert!(matches!(out, Release::Unreferenced { delete_error: Some(BrokerError::Gateway(_)) }));
        assert_eq!(share.count, 0);
    }
}
