pub mod ffmpeg_backend;
pub mod jpeg;
pub mod test_pattern;
pub mod traits;

#[cfg(test)]
pub mod testing;
