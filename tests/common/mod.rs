#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use cinema_booking::config::Config;
use cinema_booking::locks::LocalSeatLocks;
use cinema_booking::services::gateway::{GatewayError, PaymentGateway, SnapTransaction};
use cinema_booking::store::memory::MemoryStore;
use cinema_booking::AppState;

/// Gateway that always hands out a redirect url derived from the order id.
pub struct FakeGateway;

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_transaction(
        &self,
        order_id: Uuid,
        _gross_amount: i64,
    ) -> Result<SnapTransaction, GatewayError> {
        Ok(SnapTransaction {
            token: format!("token-{}", order_id),
            redirect_url: format!("https://pay.example/{}", order_id),
        })
    }
}

pub fn test_config() -> Config {
    Config::from_vars(&|_: &str| -> Option<String> { None }).expect("default config")
}

pub struct Cinema {
    pub store: MemoryStore,
    pub state: Arc<AppState>,
    pub studio_id: Uuid,
    pub movie_id: Uuid,
    pub showtime_id: Uuid,
    pub seats: Vec<Uuid>,
}

/// One studio with `seat_count` seats and one showtime of a movie priced
/// at `price`.
pub async fn cinema(seat_count: usize, price: i64) -> Cinema {
    let store = MemoryStore::new();
    let studio = store.add_studio("Studio 1").await;
    let movie = store.add_movie("Feature", price, 120).await;
    let start = Utc::now() + chrono::Duration::days(1);
    let showtime_id = store
        .add_showtime(studio.id, movie.id, start, start + movie.duration())
        .await;

    let mut seats = Vec::with_capacity(seat_count);
    for n in 0..seat_count {
        seats.push(store.add_seat(studio.id, &format!("A{}", n + 1)).await.id);
    }

    Cinema {
        state: state_for(&store),
        store,
        studio_id: studio.id,
        movie_id: movie.id,
        showtime_id,
        seats,
    }
}

pub fn state_for(store: &MemoryStore) -> Arc<AppState> {
    AppState::with_parts(
        test_config(),
        Arc::new(store.clone()),
        Arc::new(LocalSeatLocks::new(Duration::from_secs(2))),
        Arc::new(FakeGateway),
    )
}
