use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A response buffer is shorter than the minimum length of its frame.
    InvalidFrame {
        frame: u16,
        required: usize,
        actual: usize,
    },
    /// A required frame is absent from the response set.
    MissingFrame { frame: u16 },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::InvalidFrame {
                frame,
                required,
                actual,
            } => write!(
                f,
                "Invalid frame 0x{:04X}: required {} bytes, received {}",
                frame, required, actual
            ),
            Error::MissingFrame { frame } => {
                write!(f, "Frame 0x{:04X} missing from response set", frame)
            }
        }
    }
}
