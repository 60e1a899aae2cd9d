use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::utils::Clock;

struct ArmedDeadline {
    generation: u64,
    deadline: DateTime<Utc>,
    // Дроп отправителя отменяет таймер.
    _cancel: oneshot::Sender<()>,
}

/// Таймеры дедлайнов внутри процесса, по одному на активную попытку.
///
/// Таймеры живут не дольше процесса. Корректность от их срабатывания не
/// зависит: каждый метод доступа сам перепроверяет дедлайн.
pub struct TimeGuard {
    clock: Arc<dyn Clock>,
    timers: Arc<DashMap<String, ArmedDeadline>>,
    generation: AtomicU64,
}

impl TimeGuard {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            timers: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Вызывает `on_expire` после дедлайна, если таймер не отменили раньше.
    /// Повторный взвод заменяет предыдущий таймер попытки.
    pub fn arm<F, Fut>(&self, attempt_id: &str, deadline: DateTime<Utc>, on_expire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wait = (deadline - self.clock.now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

        self.timers.insert(
            attempt_id.to_string(),
            ArmedDeadline {
                generation,
                deadline,
                _cancel: cancel_tx,
            },
        );

        let timers = self.timers.clone();
        let attempt_id = attempt_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel_rx => {
                    tracing::debug!("Deadline timer cancelled: attempt={}", attempt_id);
                    return;
                }
            }

            // Снимаем регистрацию до вызова, чтобы отмена из пути завершения
            // не гонялась с этой задачей.
            timers.remove_if(&attempt_id, |_, armed| armed.generation == generation);
            tracing::info!("Deadline reached: attempt={}, deadline={}", attempt_id, deadline);
            on_expire().await;
        });
    }

    pub fn cancel(&self, attempt_id: &str) {
        if self.timers.remove(attempt_id).is_some() {
            tracing::debug!("Deadline disarmed: attempt={}", attempt_id);
        }
    }

    pub fn is_armed(&self, attempt_id: &str) -> bool {
        self.timers.contains_key(attempt_id)
    }

    pub fn deadline_of(&self, attempt_id: &str) -> Option<DateTime<Utc>> {
        self.timers.get(attempt_id).map(|armed| armed.deadline)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }
}
