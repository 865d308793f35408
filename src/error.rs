use failure::Fail;

#[derive(Debug, Fail, PartialEq, Eq)]
pub enum CoordError {
    #[fail(display = "no session for key {}", _0)]
    UnknownSession(String),
    #[fail(display = "session {} is no longer running", _0)]
    SessionClosed(String),
    #[fail(display = "invalid command: {}", _0)]
    InvalidCommand(String),
}
