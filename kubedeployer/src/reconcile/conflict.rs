use std::collections::BTreeMap;

use deployer_base::consts::UNKNOWN_OWNER;

use crate::{
    backend::{ResourceBackend, Selector},
    resource::{OwnerId, ResourceRef, ResourceRequest},
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConflictResult {
    Ok,

    /// The name is held by the given owner, or by [`UNKNOWN_OWNER`] when the
    /// live object carries no owner label.
    Conflict(String),

    /// Ownership could not be read from the backend. The request is refused
    /// as if the name were held by [`UNKNOWN_OWNER`].
    Unavailable(String),
}

impl ConflictResult {
    #[must_use]
    pub const fn is_ok(&self) -> bool { matches!(self, Self::Ok) }

    /// Owner reported to the requester when the request is refused.
    #[must_use]
    pub fn existing_owner(&self) -> Option<&str> {
        match self {
            Self::Ok => None,
            Self::Conflict(owner) => Some(owner),
            Self::Unavailable(_) => Some(UNKNOWN_OWNER),
        }
    }
}

/// Decides whether an owner may take a derived name.
///
/// The live owner label is the authority. Claims admitted earlier in the same
/// batch count as live, so two owners proposing one name in one batch cannot
/// both be admitted. Every object a request creates is checked, so a headless
/// service cannot take over a foreign endpoint slice of the same name.
pub struct ConflictDetector<'a, B> {
    backend: &'a B,
    claims: BTreeMap<ResourceRef, OwnerId>,
}

impl<'a, B> ConflictDetector<'a, B>
where
    B: ResourceBackend,
{
    pub const fn new(backend: &'a B) -> Self { Self { backend, claims: BTreeMap::new() } }

    /// Returns the first refusal among the objects `request` would create.
    pub async fn check(&self, request: &ResourceRequest) -> ConflictResult {
        for reference in request.object_references() {
            let result = self.check_reference(&reference, &request.owner).await;
            if !result.is_ok() {
                return result;
            }
        }
        ConflictResult::Ok
    }

    /// Checks `request` and claims its names when it is admitted.
    pub async fn admit(&mut self, request: &ResourceRequest) -> ConflictResult {
        let result = self.check(request).await;
        if result.is_ok() {
            for reference in request.object_references() {
                let _previous = self.claims.insert(reference, request.owner.clone());
            }
        }
        result
    }

    async fn check_reference(&self, reference: &ResourceRef, owner: &OwnerId) -> ConflictResult {
        if let Some(claimant) = self.claims.get(reference) {
            return if claimant == owner {
                ConflictResult::Ok
            } else {
                ConflictResult::Conflict(claimant.to_string())
            };
        }

        let states = match self.backend.get(&Selector::reference(reference)).await {
            Ok(states) => states,
            Err(err) => {
                tracing::warn!("Cannot check ownership of {reference}, rejecting it, error: {err}");
                return ConflictResult::Unavailable(err.to_string());
            }
        };

        match states.first().map(|state| state.owner()) {
            None => ConflictResult::Ok,
            Some(Some(live)) if live == owner.as_str() => ConflictResult::Ok,
            Some(Some(live)) => ConflictResult::Conflict(live.to_string()),
            Some(None) => ConflictResult::Conflict(UNKNOWN_OWNER.to_string()),
        }
    }
}
