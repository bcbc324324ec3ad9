pub mod capabilities;
pub mod node;
pub mod subscription;
pub mod traffic;
pub mod user;

pub use capabilities::{Clock, ExternalRoster, Notifier, NotificationKind, RosterMutation};
pub use node::{ConnectionState, CoreKind, Node};
pub use subscription::{expired, format_minute, parse_adjust_offset, DateOffset};
pub use traffic::{CredentialBinding, DnsRecord, InboundTraffic};
pub use user::User;
