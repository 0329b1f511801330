pub mod engine;
pub mod io;
pub mod sim;

pub use engine::{EngineError, EngineEvent, EngineNotifier, EngineRegistry, TrackEngine};
pub use io::{encode_wav, read_audio_file, wav_duration};
pub use sim::{SimEngine, SimSnapshot};
