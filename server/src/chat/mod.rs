pub mod dispatcher;
pub mod messages;
pub mod presence;
pub mod rate_limit;
pub mod rooms;
pub mod sanitize;
