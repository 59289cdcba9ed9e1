//! Local-edit-wins conflict resolution.

use crate::models::HydratedRecord;
use crate::sync::models::RemoteObject;

/// Conflict resolution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Replace the local record with the remote one.
    AcceptRemote,
    /// Keep the local record; it will be pushed instead.
    KeepLocal,
    /// The remote already holds exactly what we have.
    Unchanged,
}

pub struct ConflictResolver;

impl ConflictResolver {
    /// Decide what to do with an incoming remote object.
    ///
    /// `pushed_mark` is the highest local `modifiedAt` already sent to the
    /// remote. A local record above it carries an edit the remote has never
    /// seen, so it wins. Anything else takes the remote version.
    pub fn resolve(
        local: Option<&HydratedRecord>,
        remote: &RemoteObject,
        pushed_mark: i64,
    ) -> Resolution {
        let Some(local) = local else {
            return Resolution::AcceptRemote;
        };

        if local.record.encrypted == remote.data.encrypted
            && local.record.is_removed() == remote.data.removed.unwrap_or(false)
        {
            return Resolution::Unchanged;
        }

        if local.modified_at() > pushed_mark {
            Resolution::KeepLocal
        } else {
            Resolution::AcceptRemote
        }
    }
}
