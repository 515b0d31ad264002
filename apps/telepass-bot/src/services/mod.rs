pub mod access;
pub mod audit;
pub mod membership;
pub mod moderation;
pub mod sync;
