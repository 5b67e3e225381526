//! Client for the external work tracker tickets are exported to.

mod jira;
mod types;

pub use jira::JiraClient;
pub use types::{CreatedTicket, ExternalError, ExternalTicketClient};
