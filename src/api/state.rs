use crate::query::QueryFacade;
use crate::scheduler::SchedulerState;
use tokio::sync::watch;

#[derive(Clone)]
pub struct AppState {
    pub query: QueryFacade,
    /// History points per site when a request gives no `limit`.
    pub history_points: usize,
    pub scheduler: Option<watch::Receiver<SchedulerState>>,
}

impl AppState {
    pub fn new(query: QueryFacade, history_points: usize) -> Self {
        Self {
            query,
            history_points,
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, state: watch::Receiver<SchedulerState>) -> Self {
        self.scheduler = Some(state);
        self
    }
}
