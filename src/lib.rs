//! Ограниченный пул воркеров для пакетного выполнения задач
//!
//! # Features
//! - Ленивая генерация задач (`TaskSource`), один producer и ограниченная очередь
//! - Фиксированная или изменяемая на лету степень параллелизма (`resize`)
//! - Таймаут на задачу и глобальный таймаут пакета
//! - Досрочная остановка по квоте успешных результатов
//! - Разбиение результатов на winners / losers в порядке завершения
//! - Обработка паник и метрики

pub mod errors;
pub mod model;
pub mod pool;
pub mod result;
pub mod scope;
pub mod source;
pub mod task;

pub use errors::{BoxError, ConfigError, ErrorKind, PoolError, TaskError};
pub use model::{BatchSummary, Outcome, PoolMetrics, ResultSet, WorkerRecord};
pub use pool::{run_batch, Config, WorkerPool, WorkerPoolInner};
pub use result::{Aggregator, Recorded};
pub use scope::{ArmReason, CancellationScope};
pub use source::{DirSource, IterSource, TaskSource};
pub use task::{BoxedTask, Task, TaskContext, TaskFn, WorkerId};
