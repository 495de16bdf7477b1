// SPDX-License-Identifier: GPL-3.0-only
pub mod models;
pub mod recorder;
pub mod sqlite;
pub mod traits;

pub use models::UpdateRecord;
pub use recorder::HistoryRecorder;
pub use sqlite::SqliteHistory;
pub use traits::History;
