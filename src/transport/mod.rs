/// Filesystem walking and path helpers.
pub mod fs;
