pub mod id;
pub mod registry;

pub use id::{
    find_identifiers, EncodedId, Encoding, IdMatch, ItemId, SwapRule, TextForm, GUID_SWAP_ORDER,
};
pub use registry::{
    FinalizeSummary, IdentifierRecord, IdentifierRegistry, MergeGroup, TextSubstitution,
};
