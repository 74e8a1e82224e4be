mod api;

pub use api::{
    HealthResponse, LoginRequest, MeResponse, ReadyResponse, RegisterRequest, Role,
    SetPermissionsRequest, TokenResponse, UserResponse,
};
