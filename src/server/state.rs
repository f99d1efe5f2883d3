use crate::location::LocationResolver;
use std::sync::Arc;

pub struct AppState {
    pub resolver: Arc<LocationResolver>,
}
