use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A capability value is out of the range any supported device reports.
    #[snafu(display("invalid device property {property}: {value} ({reason})"))]
    InvalidProperty { property: &'static str, value: i64, reason: &'static str },
}
