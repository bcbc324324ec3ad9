pub mod codec;
pub mod errors;
pub mod frames;

pub use codec::{decode_client_frame, decode_server_frame, encode_client_frame, encode_server_frame};
pub use errors::WireError;
pub use frames::{
    ClientFrame, ListUsersRequest, LogDataFrame, ServerFrame, StatsFrame, StatsRecord,
    StreamConfig, UserBinding, UserLogData, UserRecord, UsersFrame,
};
