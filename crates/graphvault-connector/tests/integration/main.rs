//! Integration tests for the Graph connector
//!
//! These run against a local wiremock server standing in for the
//! Microsoft Graph API.

mod common;
mod test_containers;
mod test_delta;
mod test_exchange_backup;
