//! Form Submission - relaying a measurement to the remote form
//!
//! ## Architecture
//!
//! - **SubmissionMapper**: ranked field-mapping hypotheses × hidden parameter sets
//! - **FormTransport**: one URL-encoded POST per attempt (`ReqwestTransport` in production)
//! - **SubmissionEngine**: ranked search, stops at the first 200/302
//!
//! The remote form does not report which fields it understood, so an
//! accepted status is the only acknowledgement available. A combination
//! that is accepted while its data is silently discarded cannot be told
//! apart from a correct one.

pub mod engine;
pub mod mapper;
pub mod transport;

pub use engine::{Acceptance, SubmissionEngine, SubmissionError};
pub use mapper::{FieldMapping, FormTexts, HiddenParameterSet, SubmissionMapper};
pub use transport::{FormResponse, FormTransport, ReqwestTransport, TransportError};
