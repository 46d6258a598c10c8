//! Stand-ins for the two external collaborators spec.md places out of
//! scope: the LDAP wire transport (§1, "the client connection itself")
//! and a change-log-aware directory backend. `dirsyncd` ships with the
//! in-memory `MockDirectory` reference backend (spec.md's storage
//! backend is explicitly a Non-goal), so there is nothing to read a
//! real change log from either; both stand-ins are honest about that
//! rather than faking traffic.

use std::time::Duration;

use async_trait::async_trait;
use dirsync_core::conflict::NewerRecord;
use dirsync_core::decoder::DecodedMessage;
use dirsync_node::{ChangeLogReader, ProviderConnection};
use dirsync_primitives::{ChangeStamp, Dn};

/// A provider connection that never connects. Every configured remote
/// hits this until a real LDAP wire crate is wired in; the source's
/// retry schedule backs off on it exactly like it would on a real
/// dropped connection.
pub struct UnimplementedProvider {
    provider: String,
}

impl UnimplementedProvider {
    #[must_use]
    pub fn new(provider: String) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ProviderConnection for UnimplementedProvider {
    async fn recv(&mut self, _timeout: Duration) -> eyre::Result<Option<DecodedMessage>> {
        Err(eyre::eyre!(
            "no LDAP wire transport configured for provider `{}`; dialing a real provider is outside this engine's scope",
            self.provider
        ))
    }
}

/// A change log with no records, matching the in-memory reference
/// directory, which doesn't maintain one.
#[derive(Clone, Copy, Default)]
pub struct EmptyChangeLog;

#[async_trait]
impl ChangeLogReader for EmptyChangeLog {
    async fn newer_records(&self, _target: &Dn, _since: &ChangeStamp) -> eyre::Result<Vec<NewerRecord>> {
        Ok(Vec::new())
    }
}
