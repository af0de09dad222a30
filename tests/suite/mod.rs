//! Integration test modules, each driving a real `ApiClient` against wiremock.

mod allow_status;
mod dispatch;
mod recovery;
