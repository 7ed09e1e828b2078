use std::collections::HashMap;

use crate::domain::{Account, AccountId, Encoding, SequenceFragment, Username};
use crate::error::FetchError;
use crate::mapillary::decode_fragments;

/// Sequences body kept for one (account, encoding), exactly as received.
#[derive(Debug, Clone, PartialEq)]
pub enum SequencePayload {
    Structured {
        body: String,
        fragments: Vec<SequenceFragment>,
    },
    TrackLog(String),
}

impl SequencePayload {
    pub fn decode(encoding: Encoding, body: String) -> Result<Self, FetchError> {
        match encoding {
            Encoding::Structured => {
                let fragments = decode_fragments(&body).map_err(FetchError::Malformed)?;
                Ok(Self::Structured { body, fragments })
            }
            Encoding::TrackLog => Ok(Self::TrackLog(body)),
        }
    }

    /// File contents for the saved sequences.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Structured { body, .. } => body.as_bytes(),
            Self::TrackLog(text) => text.as_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceSet {
    pub account_id: AccountId,
    pub encoding: Encoding,
    pub payload: SequencePayload,
}

impl SequenceSet {
    pub fn fragments(&self) -> Option<&[SequenceFragment]> {
        match &self.payload {
            SequencePayload::Structured { fragments, .. } => Some(fragments.as_slice()),
            SequencePayload::TrackLog(_) => None,
        }
    }
}

/// Accounts by username and sequence sets by account, for one session.
#[derive(Debug, Default)]
pub struct SessionCache {
    pub(crate) accounts: HashMap<Username, Account>,
    pub(crate) sequences: HashMap<AccountId, HashMap<Encoding, SequenceSet>>,
}

impl SessionCache {
    pub fn account(&self, username: &Username) -> Option<&Account> {
        self.accounts.get(username)
    }

    pub fn sequences(&self, account: &AccountId, encoding: Encoding) -> Option<&SequenceSet> {
        self.sequences
            .get(account)
            .and_then(|bucket| bucket.get(&encoding))
    }
}
