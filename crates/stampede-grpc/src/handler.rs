use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::error;

use stampede_core::BackendError;
use stampede_proto::backend_server::Backend as GrpcBackend;
use stampede_proto::{
    AddEventRequest, AddEventResponse, AddMetricRequest, AddMetricResponse,
    AddUserResultsRequest, AddUserResultsResponse, CheckTestInstanceRequest,
    CheckTestInstanceResponse, CleanTestInstancesRequest, CleanTestInstancesResponse,
    CreateScenarioRequest, CreateScenarioResponse, CreateTestRequest, CreateTestResponse,
    CreateUsersRequest, CreateUsersResponse, DistributeWorkRequest, DistributeWorkResponse,
    Event, Events, GetEventsRequest, GetMetricRateRequest, GetMetricRequest, GetUserWorkRequest,
    GetUserWorkResponse, LastMetricResponse, MetricRateResponse, MetricStatisticsResponse,
    MetricTotalResponse, MoveScenarioResultRequest, MoveScenarioResultResponse,
    MoveUserResultsRequest, MoveUserResultsResponse, SetScenarioResultRequest,
    SetScenarioResultResponse, StopUsersRequest, StopUsersResponse,
};
use stampede_service::Backend;

/// When a drain request does not name a limit, move this many results.
const DEFAULT_RESULT_LIMIT: i64 = 500;

/// Thin gRPC adapter over the orchestration facade. Failures are logged
/// here and mapped to statuses: the `NotFound` sentinel becomes
/// `NOT_FOUND` naming the missing key, everything else is a generic
/// failure carrying the literal error message.
pub struct BackendHandler {
    backend: Arc<Backend>,
}

impl BackendHandler {
    pub fn new(backend: Arc<Backend>) -> Self {
        Self { backend }
    }
}

fn generic(err: BackendError) -> Status {
    error!("{err}");
    Status::internal(err.to_string())
}

#[tonic::async_trait]
impl GrpcBackend for BackendHandler {
    async fn create_test(
        &self,
        request: Request<CreateTestRequest>,
    ) -> Result<Response<CreateTestResponse>, Status> {
        let req = request.into_inner();

        let test_id = self
            .backend
            .create_test(&req.backend_address, &req.scheduling_metadata, req.tags, req.env)
            .await
            .map_err(generic)?;

        Ok(Response::new(CreateTestResponse { test_id }))
    }

    async fn create_scenario(
        &self,
        request: Request<CreateScenarioRequest>,
    ) -> Result<Response<CreateScenarioResponse>, Status> {
        let req = request.into_inner();

        if req.users_per_instance < 1 {
            return Err(Status::invalid_argument(
                "users_per_instance must be at least 1",
            ));
        }

        let scenario_id = self
            .backend
            .create_scenario(
                &req.test_id,
                &req.scenario_name,
                &req.context,
                req.users_per_instance,
                req.tags,
            )
            .await
            .map_err(generic)?;

        Ok(Response::new(CreateScenarioResponse { scenario_id }))
    }

    async fn create_users(
        &self,
        request: Request<CreateUsersRequest>,
    ) -> Result<Response<CreateUsersResponse>, Status> {
        let req = request.into_inner();

        let user_manager_ids = self
            .backend
            .create_users(&req.scenario_id, &req.test_id, req.amount as i64)
            .await
            .map_err(generic)?;

        Ok(Response::new(CreateUsersResponse { user_manager_ids }))
    }

    async fn stop_users(
        &self,
        request: Request<StopUsersRequest>,
    ) -> Result<Response<StopUsersResponse>, Status> {
        let req = request.into_inner();

        self.backend
            .stop_users(&req.scenario_id, req.amount as i64)
            .await
            .map_err(generic)?;

        Ok(Response::new(StopUsersResponse {}))
    }

    async fn clean_test_instances(
        &self,
        request: Request<CleanTestInstancesRequest>,
    ) -> Result<Response<CleanTestInstancesResponse>, Status> {
        let req = request.into_inner();

        self.backend
            .clean_test_instances(&req.test_id)
            .await
            .map_err(generic)?;

        Ok(Response::new(CleanTestInstancesResponse {}))
    }

    async fn check_test_instance(
        &self,
        request: Request<CheckTestInstanceRequest>,
    ) -> Result<Response<CheckTestInstanceResponse>, Status> {
        let req = request.into_inner();

        let running = self
            .backend
            .check_test_instance(&req.test_id, &req.instance_id)
            .await
            .map_err(generic)?;

        Ok(Response::new(CheckTestInstanceResponse { running }))
    }

    async fn add_test_event(
        &self,
        request: Request<AddEventRequest>,
    ) -> Result<Response<AddEventResponse>, Status> {
        let req = request.into_inner();
        let event = req
            .event
            .ok_or_else(|| Status::invalid_argument("event is required"))?;

        self.backend
            .add_test_event(&req.id, &event.kind, &event.payload)
            .await
            .map_err(|e| generic(e.context("Error adding test events")))?;

        Ok(Response::new(AddEventResponse {}))
    }

    async fn get_test_events(
        &self,
        request: Request<GetEventsRequest>,
    ) -> Result<Response<Events>, Status> {
        let req = request.into_inner();

        let events = self
            .backend
            .get_test_events(&req.id)
            .await
            .map_err(|e| generic(e.context("Error getting test events")))?;

        Ok(Response::new(Events {
            events: events
                .into_iter()
                .map(|event| Event {
                    kind: event.kind,
                    payload: event.payload,
                })
                .collect(),
        }))
    }

    async fn add_user_results(
        &self,
        request: Request<AddUserResultsRequest>,
    ) -> Result<Response<AddUserResultsResponse>, Status> {
        let req = request.into_inner();

        self.backend
            .add_user_results(&req.user_manager_id, &req.results)
            .await
            .map_err(|e| generic(e.context("Error adding user result")))?;

        Ok(Response::new(AddUserResultsResponse {}))
    }

    async fn set_scenario_result(
        &self,
        request: Request<SetScenarioResultRequest>,
    ) -> Result<Response<SetScenarioResultResponse>, Status> {
        let req = request.into_inner();

        self.backend
            .set_scenario_result(
                &req.scenario_id,
                req.output,
                req.exception,
                req.logs,
                req.time_taken,
                req.succeeded,
                req.failed,
            )
            .await
            .map_err(|e| generic(e.context("Error adding scenario result")))?;

        Ok(Response::new(SetScenarioResultResponse {}))
    }

    async fn move_user_results(
        &self,
        request: Request<MoveUserResultsRequest>,
    ) -> Result<Response<MoveUserResultsResponse>, Status> {
        let req = request.into_inner();

        let limit = if req.limit < 1 {
            DEFAULT_RESULT_LIMIT
        } else {
            req.limit as i64
        };

        let results = self
            .backend
            .move_user_results(&req.scenario_id, limit)
            .await
            .map_err(|e| generic(e.context("Error getting user results")))?;

        Ok(Response::new(MoveUserResultsResponse { results }))
    }

    async fn move_scenario_result(
        &self,
        request: Request<MoveScenarioResultRequest>,
    ) -> Result<Response<MoveScenarioResultResponse>, Status> {
        let req = request.into_inner();

        let result = self
            .backend
            .move_scenario_result(&req.scenario_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    Status::not_found(format!("Result for scenario {} not found", req.scenario_id))
                } else {
                    generic(e.context("Error moving scenario result"))
                }
            })?;

        Ok(Response::new(MoveScenarioResultResponse {
            id: result.id,
            output: result.output,
            exception: result.exception,
            logs: result.logs,
            timestamp: result.timestamp,
            time_taken: result.time_taken,
            succeeded: result.succeeded,
            failed: result.failed,
        }))
    }

    async fn distribute_work(
        &self,
        request: Request<DistributeWorkRequest>,
    ) -> Result<Response<DistributeWorkResponse>, Status> {
        let req = request.into_inner();

        self.backend
            .distribute_work(&req.scenario_id, req.amount as i64)
            .await
            .map_err(|e| generic(e.context("Error distributing work")))?;

        Ok(Response::new(DistributeWorkResponse {}))
    }

    async fn get_user_work(
        &self,
        request: Request<GetUserWorkRequest>,
    ) -> Result<Response<GetUserWorkResponse>, Status> {
        let req = request.into_inner();

        let work = self
            .backend
            .get_user_work(&req.user_manager_id)
            .await
            .map_err(|e| generic(e.context("Error getting user work")))?;

        Ok(Response::new(GetUserWorkResponse { work: work as i32 }))
    }

    async fn add_user_event(
        &self,
        request: Request<AddEventRequest>,
    ) -> Result<Response<AddEventResponse>, Status> {
        let req = request.into_inner();
        let event = req
            .event
            .ok_or_else(|| Status::invalid_argument("event is required"))?;

        self.backend
            .add_user_event(&req.id, &event.kind, &event.payload)
            .await
            .map_err(|e| generic(e.context("Error adding user event")))?;

        Ok(Response::new(AddEventResponse {}))
    }

    async fn get_user_events(
        &self,
        request: Request<GetEventsRequest>,
    ) -> Result<Response<Events>, Status> {
        let req = request.into_inner();

        let events = self
            .backend
            .get_user_events(&req.id, &req.kind)
            .await
            .map_err(|e| generic(e.context("Error getting user events")))?;

        Ok(Response::new(Events {
            events: events
                .into_iter()
                .map(|event| Event {
                    kind: event.kind,
                    payload: event.payload,
                })
                .collect(),
        }))
    }

    async fn add_metric(
        &self,
        request: Request<AddMetricRequest>,
    ) -> Result<Response<AddMetricResponse>, Status> {
        let req = request.into_inner();

        self.backend
            .add_metric(&req.scenario_id, &req.name, req.value)
            .await
            .map_err(|e| generic(e.context("Error adding metric")))?;

        Ok(Response::new(AddMetricResponse {}))
    }

    async fn get_metric_total(
        &self,
        request: Request<GetMetricRequest>,
    ) -> Result<Response<MetricTotalResponse>, Status> {
        let req = request.into_inner();

        let total = self
            .backend
            .get_metric_total(&req.scenario_id, &req.name)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    Status::not_found(format!("Metric for {} not found", req.name))
                } else {
                    generic(e.context("Error getting metric total"))
                }
            })?;

        Ok(Response::new(MetricTotalResponse { total }))
    }

    async fn get_last_metric(
        &self,
        request: Request<GetMetricRequest>,
    ) -> Result<Response<LastMetricResponse>, Status> {
        let req = request.into_inner();

        let last = self
            .backend
            .get_last_metric(&req.scenario_id, &req.name)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    Status::not_found(format!("Metric for {} not found", req.name))
                } else {
                    generic(e.context("Error getting last metric"))
                }
            })?;

        Ok(Response::new(LastMetricResponse { last }))
    }

    async fn get_metric_rate(
        &self,
        request: Request<GetMetricRateRequest>,
    ) -> Result<Response<MetricRateResponse>, Status> {
        let req = request.into_inner();

        let percentage = self
            .backend
            .get_rate(&req.scenario_id, &req.name, req.split_point)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    Status::not_found(format!("Metric for {} not found", req.name))
                } else {
                    generic(e.context("Error getting metric rate"))
                }
            })?;

        Ok(Response::new(MetricRateResponse { percentage }))
    }

    async fn get_metric_statistics(
        &self,
        request: Request<GetMetricRequest>,
    ) -> Result<Response<MetricStatisticsResponse>, Status> {
        let req = request.into_inner();

        let stats = self
            .backend
            .get_metric_statistics(&req.scenario_id, &req.name)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    Status::not_found(format!("Metric for {} not found", req.name))
                } else {
                    generic(e.context("Error getting metric statistics"))
                }
            })?;

        Ok(Response::new(MetricStatisticsResponse {
            min: stats.min,
            max: stats.max,
            median: stats.median,
            average: stats.average,
            len: stats.len,
        }))
    }
}
