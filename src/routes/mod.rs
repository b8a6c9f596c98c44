pub mod access;
pub mod health;
pub mod menu;
pub mod security;
