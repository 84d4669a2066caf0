pub mod subject;

pub use subject::{AuthenticatedSubject, SubjectVerifier};
