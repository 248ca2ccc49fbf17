use crate::{
    client::ShortlinkClient,
    error::{Error, Operation, Result},
    store::ObjectStore,
};
use tracing::{debug, info};
use urlshortener_k8s_api::{ResourceExt, ShortLink, ShortLinkStatus};

/// Enforces per-user ownership on top of a [`ShortlinkClient`].
///
/// A user may read, modify or delete a ShortLink iff they are its owner or
/// one of its co-owners. Only the owner may change who else has access.
#[derive(Clone)]
pub struct ShortlinkClientAuth<S> {
    client: ShortlinkClient<S>,
}

// === impl ShortlinkClientAuth ===

impl<S: ObjectStore> ShortlinkClientAuth<S> {
    pub fn new(client: ShortlinkClient<S>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ShortlinkClient<S> {
        &self.client
    }

    /// Lists the ShortLinks in the default namespace owned or co-owned by
    /// `user`.
    pub async fn list(&self, user: &str) -> Result<Vec<ShortLink>> {
        let links = self.client.list().await?;
        Ok(links.into_iter().filter(|l| l.is_owned_by(user)).collect())
    }

    pub async fn get(&self, user: &str, name: &str) -> Result<ShortLink> {
        let link = self.client.get(name).await?;
        authorize(&link, Operation::Get, user)?;
        Ok(link)
    }

    /// Creates a ShortLink owned by `user`, whatever owner the input names.
    pub async fn create(&self, user: &str, link: &ShortLink) -> Result<ShortLink> {
        let mut link = link.clone();
        link.spec.owner = user.to_string();
        let created = self.client.create(&link).await?;
        info!(%user, name = %created.name_any(), "Created ShortLink");
        Ok(created)
    }

    /// Replaces the spec of an existing ShortLink and records `user` as the
    /// last writer.
    ///
    /// `owner` and `coOwners` always keep their stored values; access changes
    /// go through [`Self::share`] and [`Self::revoke`]. Status is only written
    /// once the spec write has been accepted.
    pub async fn update(&self, user: &str, link: &ShortLink) -> Result<ShortLink> {
        let namespace = link
            .namespace()
            .unwrap_or_else(|| self.client.namespace().to_string());
        let current = self
            .client
            .get_namespaced(&namespace, &link.name_any())
            .await?;
        authorize(&current, Operation::Update, user)?;

        let mut next = current.clone();
        next.spec = link.spec.clone();
        next.spec.owner = current.spec.owner.clone();
        next.spec.co_owners = current.spec.co_owners.clone();
        if let Some(version) = link.resource_version() {
            next.metadata.resource_version = Some(version);
        }
        let mut saved = self.client.save(&next).await?;

        let status = saved.status.get_or_insert_with(ShortLinkStatus::default);
        status.changed_by = Some(user.to_string());
        status.last_modified = Some(chrono::Utc::now().to_rfc3339());
        let saved = self.client.save_status(&saved).await?;
        info!(%user, name = %saved.name_any(), "Updated ShortLink");
        Ok(saved)
    }

    pub async fn delete(&self, user: &str, link: &ShortLink) -> Result<()> {
        let namespace = link
            .namespace()
            .unwrap_or_else(|| self.client.namespace().to_string());
        let current = self
            .client
            .get_namespaced(&namespace, &link.name_any())
            .await?;
        authorize(&current, Operation::Delete, user)?;
        self.client.delete(&current).await?;
        info!(%user, name = %current.name_any(), "Deleted ShortLink");
        Ok(())
    }

    /// Grants `grantee` co-ownership of the named ShortLink. Only the primary
    /// owner may share.
    pub async fn share(&self, user: &str, name: &str, grantee: &str) -> Result<ShortLink> {
        let current = self.client.get(name).await?;
        if current.spec.owner != user {
            return Err(Error::not_allowed(Operation::Share, user, name));
        }
        if current.is_owned_by(grantee) {
            debug!(%user, %name, %grantee, "Already shared");
            return Ok(current);
        }
        let mut next = current;
        next.spec.co_owners.push(grantee.to_string());
        let saved = self.client.save(&next).await?;
        info!(%user, %name, %grantee, "Shared ShortLink");
        Ok(saved)
    }

    /// Withdraws `grantee`'s co-ownership of the named ShortLink. Only the
    /// primary owner may revoke, and the owner itself cannot be revoked.
    pub async fn revoke(&self, user: &str, name: &str, grantee: &str) -> Result<ShortLink> {
        let current = self.client.get(name).await?;
        if current.spec.owner != user {
            return Err(Error::not_allowed(Operation::Revoke, user, name));
        }
        if !current.spec.co_owners.iter().any(|o| o == grantee) {
            debug!(%user, %name, %grantee, "Not a co-owner");
            return Ok(current);
        }
        let mut next = current;
        next.spec.co_owners.retain(|o| o != grantee);
        let saved = self.client.save(&next).await?;
        info!(%user, %name, %grantee, "Revoked ShortLink co-owner");
        Ok(saved)
    }
}

fn authorize(link: &ShortLink, operation: Operation, user: &str) -> Result<()> {
    if link.is_owned_by(user) {
        return Ok(());
    }
    debug!(%user, name = %link.name_any(), %operation, "Denied");
    Err(Error::not_allowed(operation, user, link.name_any()))
}
