//! License pipeline: protection headers, the CDM capability and the
//! per-track key provider.

pub mod cdm;
pub mod provider;
pub mod pssh;
pub mod remote;

pub use cdm::{Cdm, Key, SessionId};
pub use provider::{DecryptionKeyProvider, LicenseExchange, LicenseState};
pub use pssh::Pssh;
pub use remote::RemoteCdm;
