pub mod affiliation;
pub mod caller;
pub mod certificate;
pub mod identity;

pub use affiliation::{AffiliationNode, AffiliationPath, AffiliationTree, InvalidAffiliation};
pub use caller::CallerAffiliation;
pub use certificate::{CertificateRecord, CertificateStatus, RevocationReason};
pub use identity::{IdentityRecord, ATTR_AFFILIATION_MGR, ATTR_REGISTRAR_ROLES};
