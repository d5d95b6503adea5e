pub mod random_draw;
pub mod retry;
