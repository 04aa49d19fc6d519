mod lifecycle;
mod repository;
mod staff;
mod state;
mod task;

pub use lifecycle::{AssignmentEvent, SYSTEM_ASSIGNER, TaskLifecycleManager};
pub use repository::{InMemoryTaskRepository, JsonFileTaskRepository, TaskRepository};
pub use staff::{InMemoryStaffDirectory, StaffDirectory, StaffMember};
pub use state::{TaskAction, TaskStateMachine, TaskStatus, Transition};
pub use task::{NewTask, Priority, Task, TaskFilter, TaskSource};
