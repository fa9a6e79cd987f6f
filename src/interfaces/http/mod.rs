mod api_types;
mod routes;

pub use routes::build_router;
