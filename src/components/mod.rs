// Export components
pub mod calendar;
pub mod planner;
pub mod token;

// Re-export the credential lifecycle owner
pub use token::TokenManager;
