use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use medstock_auth::{Actor, Role, authorize};
use medstock_catalog::{InstitutionKey, ProductCode};
use medstock_core::{
    ActorId, Aggregate, AggregateRoot, DomainError, DomainResult, ProposalId, RequestId,
    WarehouseId,
};
use medstock_events::Event;

/// Purchase request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Draft,
    Pending,
    Validated,
    InPreparation,
    Prepared,
    Delivered,
    Rejected,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Delivered | RequestState::Rejected | RequestState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLine {
    pub product: ProductCode,
    pub qty_requested: i64,
    /// Set by the validator; defaults to the requested qty.
    pub qty_approved: Option<i64>,
    pub justification: Option<String>,
    /// Picked short of the approved qty.
    pub partial: bool,
    pub shortfall_reason: Option<String>,
}

impl RequestLine {
    pub fn approved(&self) -> i64 {
        self.qty_approved.unwrap_or(self.qty_requested)
    }
}

/// Validator decision for one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineApproval {
    pub product: ProductCode,
    pub qty_approved: i64,
    pub justification: Option<String>,
}

/// Aggregate root: PurchaseRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRequest {
    id: RequestId,
    folio: String,
    institution: Option<InstitutionKey>,
    warehouse: Option<WarehouseId>,
    requested_on: Option<NaiveDate>,
    state: RequestState,
    lines: Vec<RequestLine>,
    observations: Option<String>,
    requester: Option<ActorId>,
    validator: Option<ActorId>,
    validated_at: Option<DateTime<Utc>>,
    proposal: Option<ProposalId>,
    receiver_name: Option<String>,
    receiver_signature: Option<String>,
    delivered_at: Option<DateTime<Utc>>,
    closing_reason: Option<String>,
    version: u64,
    created: bool,
}

impl PurchaseRequest {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: RequestId) -> Self {
        Self {
            id,
            folio: String::new(),
            institution: None,
            warehouse: None,
            requested_on: None,
            state: RequestState::Draft,
            lines: Vec::new(),
            observations: None,
            requester: None,
            validator: None,
            validated_at: None,
            proposal: None,
            receiver_name: None,
            receiver_signature: None,
            delivered_at: None,
            closing_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn folio(&self) -> &str {
        &self.folio
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn lines(&self) -> &[RequestLine] {
        &self.lines
    }

    pub fn line(&self, product: &ProductCode) -> Option<&RequestLine> {
        self.lines.iter().find(|l| &l.product == product)
    }

    pub fn institution(&self) -> Option<&InstitutionKey> {
        self.institution.as_ref()
    }

    pub fn warehouse(&self) -> Option<WarehouseId> {
        self.warehouse
    }

    pub fn requested_on(&self) -> Option<NaiveDate> {
        self.requested_on
    }

    pub fn requester(&self) -> Option<ActorId> {
        self.requester
    }

    pub fn validator(&self) -> Option<ActorId> {
        self.validator
    }

    pub fn proposal(&self) -> Option<ProposalId> {
        self.proposal
    }

    pub fn receiver_name(&self) -> Option<&str> {
        self.receiver_name.as_deref()
    }

    pub fn closing_reason(&self) -> Option<&str> {
        self.closing_reason.as_deref()
    }

    pub fn observations(&self) -> Option<&str> {
        self.observations.as_deref()
    }

    /// Lines with their approved quantities, as fed to the planner.
    pub fn approved_lines(&self) -> Vec<(ProductCode, i64)> {
        self.lines
            .iter()
            .map(|l| (l.product.clone(), l.approved()))
            .collect()
    }
}

impl AggregateRoot for PurchaseRequest {
    type Id = RequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub request_id: RequestId,
    pub folio: String,
    pub institution: InstitutionKey,
    pub warehouse: WarehouseId,
    pub requested_on: NaiveDate,
    pub observations: Option<String>,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Command: AddLine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddLine {
    pub product: ProductCode,
    pub qty: i64,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Command: ValidateRequest. The store generates the proposal in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateRequest {
    pub approvals: Vec<LineApproval>,
    pub proposal: ProposalId,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Command: DeliverRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverRequest {
    pub receiver_name: String,
    pub receiver_signature: String,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Command: FlagPartial. Records a short pick on a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagPartial {
    pub product: ProductCode,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    pub reason: String,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceProposal {
    pub proposal: ProposalId,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestCommand {
    Create(CreateRequest),
    AddLine(AddLine),
    Submit(Transition),
    Validate(ValidateRequest),
    Reject(CloseRequest),
    ReplaceProposal(ReplaceProposal),
    StartPreparation(Transition),
    FlagPartial(FlagPartial),
    MarkPrepared(Transition),
    Deliver(DeliverRequest),
    Cancel(CloseRequest),
}

/// Event: RequestCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCreated {
    pub request_id: RequestId,
    pub folio: String,
    pub institution: InstitutionKey,
    pub warehouse: WarehouseId,
    pub requested_on: NaiveDate,
    pub observations: Option<String>,
    pub requester: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub request_id: RequestId,
    pub product: ProductCode,
    pub qty: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequestValidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestValidated {
    pub request_id: RequestId,
    pub approvals: Vec<LineApproval>,
    pub proposal: ProposalId,
    pub validator: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a state change with no payload beyond the new state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMoved {
    pub request_id: RequestId,
    pub to: RequestState,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProposalReplaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalReplaced {
    pub request_id: RequestId,
    pub previous: Option<ProposalId>,
    pub proposal: ProposalId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineFlaggedPartial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineFlaggedPartial {
    pub request_id: RequestId,
    pub product: ProductCode,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequestDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDelivered {
    pub request_id: RequestId,
    pub receiver_name: String,
    pub receiver_signature: String,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequestClosed (rejected or cancelled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestClosed {
    pub request_id: RequestId,
    pub to: RequestState,
    pub reason: String,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestEvent {
    Created(RequestCreated),
    LineAdded(LineAdded),
    Moved(RequestMoved),
    Validated(RequestValidated),
    ProposalReplaced(ProposalReplaced),
    LineFlaggedPartial(LineFlaggedPartial),
    Delivered(RequestDelivered),
    Closed(RequestClosed),
}

impl Event for RequestEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RequestEvent::Created(_) => "orders.request.created",
            RequestEvent::LineAdded(_) => "orders.request.line_added",
            RequestEvent::Moved(e) => match e.to {
                RequestState::Pending => "orders.request.submitted",
                RequestState::InPreparation => "orders.request.in_preparation",
                RequestState::Prepared => "orders.request.prepared",
                _ => "orders.request.moved",
            },
            RequestEvent::Validated(_) => "orders.request.validated",
            RequestEvent::ProposalReplaced(_) => "orders.request.proposal_replaced",
            RequestEvent::LineFlaggedPartial(_) => "orders.request.line_partial",
            RequestEvent::Delivered(_) => "orders.request.delivered",
            RequestEvent::Closed(e) if e.to == RequestState::Rejected => "orders.request.rejected",
            RequestEvent::Closed(_) => "orders.request.cancelled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RequestEvent::Created(e) => e.occurred_at,
            RequestEvent::LineAdded(e) => e.occurred_at,
            RequestEvent::Moved(e) => e.occurred_at,
            RequestEvent::Validated(e) => e.occurred_at,
            RequestEvent::ProposalReplaced(e) => e.occurred_at,
            RequestEvent::LineFlaggedPartial(e) => e.occurred_at,
            RequestEvent::Delivered(e) => e.occurred_at,
            RequestEvent::Closed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseRequest {
    type Command = RequestCommand;
    type Event = RequestEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RequestEvent::Created(e) => {
                self.id = e.request_id;
                self.folio = e.folio.clone();
                self.institution = Some(e.institution.clone());
                self.warehouse = Some(e.warehouse);
                self.requested_on = Some(e.requested_on);
                self.observations = e.observations.clone();
                self.requester = Some(e.requester);
                self.state = RequestState::Draft;
                self.created = true;
            }
            RequestEvent::LineAdded(e) => {
                self.lines.push(RequestLine {
                    product: e.product.clone(),
                    qty_requested: e.qty,
                    qty_approved: None,
                    justification: None,
                    partial: false,
                    shortfall_reason: None,
                });
            }
            RequestEvent::Moved(e) => {
                self.state = e.to;
            }
            RequestEvent::Validated(e) => {
                for approval in &e.approvals {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.product == approval.product) {
                        line.qty_approved = Some(approval.qty_approved);
                        line.justification = approval.justification.clone();
                    }
                }
                for line in &mut self.lines {
                    line.qty_approved.get_or_insert(line.qty_requested);
                }
                self.validator = Some(e.validator);
                self.validated_at = Some(e.occurred_at);
                self.proposal = Some(e.proposal);
                self.state = RequestState::Validated;
            }
            RequestEvent::ProposalReplaced(e) => {
                self.proposal = Some(e.proposal);
            }
            RequestEvent::LineFlaggedPartial(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.product == e.product) {
                    line.partial = true;
                    line.shortfall_reason = Some(e.reason.clone());
                }
            }
            RequestEvent::Delivered(e) => {
                self.receiver_name = Some(e.receiver_name.clone());
                self.receiver_signature = Some(e.receiver_signature.clone());
                self.delivered_at = Some(e.occurred_at);
                self.state = RequestState::Delivered;
            }
            RequestEvent::Closed(e) => {
                self.closing_reason = Some(e.reason.clone());
                self.state = e.to;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RequestCommand::Create(cmd) => self.handle_create(cmd),
            RequestCommand::AddLine(cmd) => self.handle_add_line(cmd),
            RequestCommand::Submit(cmd) => self.handle_submit(cmd),
            RequestCommand::Validate(cmd) => self.handle_validate(cmd),
            RequestCommand::Reject(cmd) => self.handle_reject(cmd),
            RequestCommand::ReplaceProposal(cmd) => self.handle_replace_proposal(cmd),
            RequestCommand::StartPreparation(cmd) => {
                self.handle_move(cmd, &Role::DISPATCHER, RequestState::Validated, RequestState::InPreparation)
            }
            RequestCommand::FlagPartial(cmd) => self.handle_flag_partial(cmd),
            RequestCommand::MarkPrepared(cmd) => {
                self.handle_move(cmd, &Role::DISPATCHER, RequestState::InPreparation, RequestState::Prepared)
            }
            RequestCommand::Deliver(cmd) => self.handle_deliver(cmd),
            RequestCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PurchaseRequest {
    fn ensure_state(&self, expected: RequestState) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found(format!("request {}", self.id)));
        }
        if self.state != expected {
            return Err(DomainError::state(format!(
                "request {} is {:?}, expected {:?}",
                self.folio, self.state, expected
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateRequest) -> DomainResult<Vec<RequestEvent>> {
        authorize(&cmd.actor, &Role::REQUESTER)?;
        if self.created {
            return Err(DomainError::conflict("request already exists"));
        }
        if cmd.folio.trim().is_empty() {
            return Err(DomainError::validation("folio is required"));
        }

        Ok(vec![RequestEvent::Created(RequestCreated {
            request_id: cmd.request_id,
            folio: cmd.folio.clone(),
            institution: cmd.institution.clone(),
            warehouse: cmd.warehouse,
            requested_on: cmd.requested_on,
            observations: cmd.observations.clone(),
            requester: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> DomainResult<Vec<RequestEvent>> {
        authorize(&cmd.actor, &Role::REQUESTER)?;
        self.ensure_state(RequestState::Draft)?;
        if cmd.qty <= 0 {
            return Err(DomainError::validation(format!(
                "requested qty must be positive, got {}",
                cmd.qty
            )));
        }
        if self.line(&cmd.product).is_some() {
            return Err(DomainError::validation(format!(
                "product {} is already on the request",
                cmd.product
            )));
        }

        Ok(vec![RequestEvent::LineAdded(LineAdded {
            request_id: self.id,
            product: cmd.product.clone(),
            qty: cmd.qty,
            occurred_at: cmd.at,
        })])
    }

    fn handle_submit(&self, cmd: &Transition) -> DomainResult<Vec<RequestEvent>> {
        authorize(&cmd.actor, &Role::REQUESTER)?;
        self.ensure_state(RequestState::Draft)?;
        if self.lines.is_empty() {
            return Err(DomainError::validation("request has no lines"));
        }
        Ok(vec![RequestEvent::Moved(RequestMoved {
            request_id: self.id,
            to: RequestState::Pending,
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_validate(&self, cmd: &ValidateRequest) -> DomainResult<Vec<RequestEvent>> {
        authorize(&cmd.actor, &Role::VALIDATOR)?;
        self.ensure_state(RequestState::Pending)?;

        for approval in &cmd.approvals {
            let line = self.line(&approval.product).ok_or_else(|| {
                DomainError::not_found(format!("line for product {}", approval.product))
            })?;
            if approval.qty_approved < 0 || approval.qty_approved > line.qty_requested {
                return Err(DomainError::validation(format!(
                    "approved qty {} for {} must be within 0..={}",
                    approval.qty_approved, approval.product, line.qty_requested
                )));
            }
            let justified = approval
                .justification
                .as_deref()
                .is_some_and(|j| !j.trim().is_empty());
            if approval.qty_approved != line.qty_requested && !justified {
                return Err(DomainError::validation(format!(
                    "changing the qty of {} requires a justification",
                    approval.product
                )));
            }
        }

        Ok(vec![RequestEvent::Validated(RequestValidated {
            request_id: self.id,
            approvals: cmd.approvals.clone(),
            proposal: cmd.proposal,
            validator: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_reject(&self, cmd: &CloseRequest) -> DomainResult<Vec<RequestEvent>> {
        authorize(&cmd.actor, &Role::VALIDATOR)?;
        self.ensure_state(RequestState::Pending)?;
        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("a rejection reason is required"));
        }
        Ok(vec![RequestEvent::Closed(RequestClosed {
            request_id: self.id,
            to: RequestState::Rejected,
            reason: reason.to_string(),
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_replace_proposal(&self, cmd: &ReplaceProposal) -> DomainResult<Vec<RequestEvent>> {
        authorize(&cmd.actor, &Role::VALIDATOR)?;
        self.ensure_state(RequestState::Validated)?;
        Ok(vec![RequestEvent::ProposalReplaced(ProposalReplaced {
            request_id: self.id,
            previous: self.proposal,
            proposal: cmd.proposal,
            occurred_at: cmd.at,
        })])
    }

    fn handle_move(
        &self,
        cmd: &Transition,
        role: &Role,
        from: RequestState,
        to: RequestState,
    ) -> DomainResult<Vec<RequestEvent>> {
        authorize(&cmd.actor, role)?;
        self.ensure_state(from)?;
        Ok(vec![RequestEvent::Moved(RequestMoved {
            request_id: self.id,
            to,
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_flag_partial(&self, cmd: &FlagPartial) -> DomainResult<Vec<RequestEvent>> {
        self.ensure_state(RequestState::InPreparation)?;
        if self.line(&cmd.product).is_none() {
            return Err(DomainError::not_found(format!("line for product {}", cmd.product)));
        }
        Ok(vec![RequestEvent::LineFlaggedPartial(LineFlaggedPartial {
            request_id: self.id,
            product: cmd.product.clone(),
            reason: cmd.reason.clone(),
            occurred_at: cmd.at,
        })])
    }

    fn handle_deliver(&self, cmd: &DeliverRequest) -> DomainResult<Vec<RequestEvent>> {
        authorize(&cmd.actor, &Role::DISPATCHER)?;
        self.ensure_state(RequestState::Prepared)?;
        if cmd.receiver_name.trim().is_empty() {
            return Err(DomainError::validation("receiver name is required"));
        }
        if cmd.receiver_signature.trim().is_empty() {
            return Err(DomainError::validation("receiver signature is required"));
        }
        Ok(vec![RequestEvent::Delivered(RequestDelivered {
            request_id: self.id,
            receiver_name: cmd.receiver_name.trim().to_string(),
            receiver_signature: cmd.receiver_signature.clone(),
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_cancel(&self, cmd: &CloseRequest) -> DomainResult<Vec<RequestEvent>> {
        if !cmd.actor.has_role(&Role::REQUESTER) && !cmd.actor.has_role(&Role::VALIDATOR) {
            return Err(DomainError::unauthorized(format!(
                "actor '{}' may not cancel requests",
                cmd.actor.name
            )));
        }
        if !self.created {
            return Err(DomainError::not_found(format!("request {}", self.id)));
        }
        if self.state.is_terminal() {
            return Err(DomainError::state(format!(
                "request {} is already {:?}",
                self.folio, self.state
            )));
        }
        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("a cancellation reason is required"));
        }
        Ok(vec![RequestEvent::Closed(RequestClosed {
            request_id: self.id,
            to: RequestState::Cancelled,
            reason: reason.to_string(),
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }
}
