pub mod drawtext;
pub mod ffmpeg;
pub mod fs_jobs;
pub mod whisper;
