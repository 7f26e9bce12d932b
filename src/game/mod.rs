pub mod constants;
pub mod state;
pub mod players;
pub mod systems;
pub mod match_result;
