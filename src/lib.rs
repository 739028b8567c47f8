pub mod audit;
pub mod dates;
pub mod db;
pub mod extract;
pub mod grid;
pub mod import;
pub mod locate;
pub mod model;
pub mod store;
pub mod structure;
pub mod syncback;

pub use model::{AttendanceFlag, AttendanceRecord, DepartureRecord, ScheduleTemplate, UnitSpec};
pub use syncback::{SyncMode, SyncOutcome};
