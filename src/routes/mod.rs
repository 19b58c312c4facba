/// Router Module Index
///
/// Routes are grouped by who may call them, and each group gets its access
/// layer in `create_router`.

/// Anonymous routes: health, signup, login and session routing.
pub mod public;

/// Routes behind the `AuthUser` middleware.
pub mod authenticated;

/// Moderation routes, nested under `/admin`. Role checked in the handlers.
pub mod admin;
