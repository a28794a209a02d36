//! Request and response shapes for the NeuroSync backend.
//!
//! This module contains the payload types the feature wrappers send and
//! receive:
//!
//! - `Task`, `TaskCreate`, `TaskUpdate`: to-do items with priority and recurrence
//! - `ChatMessage`, `ChatResponse`, `ChatHistoryEntry`: assistant conversations
//! - Finance types: `BudgetRequest`, `TransactionSummary`, `BudgetProgress`
//! - Calendar types: `CalendarEventRequest`, `CalendarAuthStatus`
//! - `Credentials`, `Registration`: inputs to the session endpoints
//! - `UserProfile`: the signed-in account

pub mod calendar;
pub mod chat;
pub(crate) mod de;
pub mod finance;
pub mod task;
pub mod user;

pub use calendar::{CalendarAuthStatus, CalendarEventRequest};
pub use chat::{ChatHistoryEntry, ChatMessage, ChatResponse};
pub use finance::{
    BudgetItem, BudgetProgress, BudgetProgressItem, BudgetRequest, BudgetStatus, SavedBudget,
    TransactionSummary,
};
pub use task::{Recurrence, Task, TaskCreate, TaskPriority, TaskUpdate};
pub use user::{Credentials, Registration, UserProfile};
