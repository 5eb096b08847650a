//! Pick proposals.
//!
//! A proposal is generated from FEFO line plans when a request is validated.
//! Each planned pick becomes a [`LotAssignment`] backed by a reservation on
//! the placement; assignments are picked one by one and the proposal
//! completes when none is outstanding.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use medstock_catalog::ProductCode;
use medstock_core::{
    ActorId, AssignmentId, BinId, DomainError, DomainResult, LotId, MovementId, PlacementId,
    ProposalId, ProposalItemId, RequestId,
};

use medstock_events::Event;

use crate::fefo::{LinePlan, PlannedPick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalState {
    Generated,
    Reviewed,
    Completed,
    Cancelled,
    /// Replaced by a regenerated proposal.
    Superseded,
}

impl ProposalState {
    pub fn is_open(self) -> bool {
        matches!(self, ProposalState::Generated | ProposalState::Reviewed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Allocated,
    Partial,
    Unavailable,
}

/// One reserved pick: `qty` units of a lot on one placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotAssignment {
    pub id: AssignmentId,
    pub item: ProposalItemId,
    pub lot_id: LotId,
    pub lot_number: String,
    pub expiry: NaiveDate,
    pub placement: PlacementId,
    pub bin: BinId,
    pub bin_code: String,
    pub qty: i64,
    pub near_expiry: bool,
    pub picked: bool,
    pub picked_qty: i64,
    /// Reservation handed back without being picked.
    pub released_qty: i64,
    pub picker: Option<ActorId>,
    pub picked_at: Option<DateTime<Utc>>,
    pub movement: Option<MovementId>,
}

impl LotAssignment {
    fn from_pick(item: ProposalItemId, pick: &PlannedPick) -> Self {
        Self {
            id: AssignmentId::new(),
            item,
            lot_id: pick.lot_id,
            lot_number: pick.lot_number.clone(),
            expiry: pick.expiry,
            placement: pick.placement,
            bin: pick.bin,
            bin_code: pick.bin_code.clone(),
            qty: pick.qty,
            near_expiry: pick.near_expiry,
            picked: false,
            picked_qty: 0,
            released_qty: 0,
            picker: None,
            picked_at: None,
            movement: None,
        }
    }

    /// Reserved units still held on the placement.
    pub fn outstanding(&self) -> i64 {
        if self.picked {
            0
        } else {
            self.qty - self.released_qty
        }
    }

    pub fn is_short(&self) -> bool {
        self.picked && self.picked_qty < self.qty
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalItem {
    pub id: ProposalItemId,
    pub product: ProductCode,
    pub qty_approved: i64,
    /// Free quantity seen by the planner.
    pub qty_available: i64,
    pub assignments: Vec<LotAssignment>,
    pub status: ItemStatus,
    pub shortfall: i64,
    pub shortfall_reason: Option<String>,
}

impl ProposalItem {
    fn from_plan(plan: &LinePlan) -> DomainResult<Self> {
        let id = ProposalItemId::new();
        let mut item = Self {
            id,
            product: plan.product.clone(),
            qty_approved: plan.requested,
            qty_available: 0,
            assignments: Vec::new(),
            status: ItemStatus::Unavailable,
            shortfall: 0,
            shortfall_reason: None,
        };
        item.apply_plan(plan)?;
        Ok(item)
    }

    /// Append the plan's picks and recompute status from everything assigned.
    fn apply_plan(&mut self, plan: &LinePlan) -> DomainResult<()> {
        if plan.product != self.product {
            return Err(DomainError::validation(format!(
                "plan for {} applied to item for {}",
                plan.product, self.product
            )));
        }
        let new: Vec<LotAssignment> = plan
            .picks
            .iter()
            .map(|p| LotAssignment::from_pick(self.id, p))
            .collect();
        let committed = self.committed_qty();
        let planned: i64 = new.iter().map(|a| a.qty).sum();
        if committed + planned > self.qty_approved {
            return Err(DomainError::validation(format!(
                "assignments for {} total {} above approved {}",
                self.product,
                committed + planned,
                self.qty_approved
            )));
        }

        self.assignments.extend(new);
        self.qty_available = plan.free_total;
        self.shortfall = self.qty_approved - self.committed_qty();
        self.shortfall_reason = plan.shortfall_reason.clone();
        self.status = if self.shortfall == 0 {
            ItemStatus::Allocated
        } else if self.committed_qty() > 0 {
            ItemStatus::Partial
        } else {
            ItemStatus::Unavailable
        };
        Ok(())
    }

    /// Units either picked or still reserved.
    pub fn committed_qty(&self) -> i64 {
        self.assignments
            .iter()
            .map(|a| if a.picked { a.picked_qty } else { a.outstanding() })
            .sum()
    }

    pub fn picked_qty(&self) -> i64 {
        self.assignments.iter().filter(|a| a.picked).map(|a| a.picked_qty).sum()
    }

    /// Units the line still needs beyond what was already picked.
    pub fn remaining_need(&self) -> i64 {
        (self.qty_approved - self.picked_qty()).max(0)
    }

    pub fn is_partial(&self) -> bool {
        self.assignments.iter().any(LotAssignment::is_short) || self.status != ItemStatus::Allocated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub request_id: RequestId,
    pub request_folio: String,
    pub state: ProposalState,
    pub items: Vec<ProposalItem>,
    pub generated_by: ActorId,
    pub generated_at: DateTime<Utc>,
    pub reviewed_by: Option<ActorId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub partial_accepted: bool,
    pub completed_by: Option<ActorId>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    /// Count of published proposal notifications.
    #[serde(default)]
    pub revision: u64,
}

impl Proposal {
    /// Build a proposal from one plan per request line.
    pub fn from_plans(
        id: ProposalId,
        request_id: RequestId,
        request_folio: impl Into<String>,
        plans: &[LinePlan],
        actor: ActorId,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let items = plans
            .iter()
            .map(ProposalItem::from_plan)
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(Self {
            id,
            request_id,
            request_folio: request_folio.into(),
            state: ProposalState::Generated,
            items,
            generated_by: actor,
            generated_at: at,
            reviewed_by: None,
            reviewed_at: None,
            partial_accepted: false,
            completed_by: None,
            completed_at: None,
            cancel_reason: None,
            revision: 0,
        })
    }

    pub fn item(&self, id: ProposalItemId) -> Option<&ProposalItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn assignments(&self) -> impl Iterator<Item = &LotAssignment> {
        self.items.iter().flat_map(|i| i.assignments.iter())
    }

    pub fn assignment(&self, id: AssignmentId) -> DomainResult<&LotAssignment> {
        self.assignments()
            .find(|a| a.id == id)
            .ok_or_else(|| DomainError::not_found(format!("assignment {id}")))
    }

    fn assignment_mut(&mut self, id: AssignmentId) -> DomainResult<&mut LotAssignment> {
        self.items
            .iter_mut()
            .flat_map(|i| i.assignments.iter_mut())
            .find(|a| a.id == id)
            .ok_or_else(|| DomainError::not_found(format!("assignment {id}")))
    }

    /// Assignments still holding a reservation.
    pub fn outstanding(&self) -> Vec<LotAssignment> {
        self.assignments().filter(|a| a.outstanding() > 0).cloned().collect()
    }

    pub fn has_shortfall(&self) -> bool {
        self.items.iter().any(|i| i.shortfall > 0)
    }

    pub fn all_picked(&self) -> bool {
        self.assignments().all(|a| a.picked || a.outstanding() == 0)
    }

    /// Lots referenced by unpicked assignments, sorted and deduplicated.
    pub fn outstanding_lots(&self) -> Vec<LotId> {
        let mut lots: Vec<LotId> = self
            .assignments()
            .filter(|a| a.outstanding() > 0)
            .map(|a| a.lot_id)
            .collect();
        lots.sort();
        lots.dedup();
        lots
    }

    fn ensure_state(&self, expected: ProposalState) -> DomainResult<()> {
        if self.state != expected {
            return Err(DomainError::state(format!(
                "proposal for {} is {:?}, expected {:?}",
                self.request_folio, self.state, expected
            )));
        }
        Ok(())
    }

    /// Confirm the proposal. A shortfall must be explicitly accepted.
    pub fn review(&mut self, actor: ActorId, at: DateTime<Utc>, accept_partial: bool) -> DomainResult<()> {
        self.ensure_state(ProposalState::Generated)?;
        if self.has_shortfall() && !accept_partial {
            return Err(DomainError::state(format!(
                "proposal for {} is partially allocated; accept the shortfall or regenerate",
                self.request_folio
            )));
        }
        self.state = ProposalState::Reviewed;
        self.reviewed_by = Some(actor);
        self.reviewed_at = Some(at);
        self.partial_accepted = self.has_shortfall();
        Ok(())
    }

    /// Validate a pick before the lot is touched.
    pub fn check_pick(&self, assignment: AssignmentId, picked_qty: i64) -> DomainResult<&LotAssignment> {
        self.ensure_state(ProposalState::Reviewed)?;
        let a = self.assignment(assignment)?;
        if a.picked {
            return Err(DomainError::state(format!("assignment {assignment} already picked")));
        }
        if picked_qty < 0 || picked_qty > a.outstanding() {
            return Err(DomainError::validation(format!(
                "picked qty {picked_qty} must be within 0..={}",
                a.outstanding()
            )));
        }
        Ok(a)
    }

    pub fn record_pick(
        &mut self,
        assignment: AssignmentId,
        picked_qty: i64,
        picker: ActorId,
        at: DateTime<Utc>,
        movement: Option<MovementId>,
    ) -> DomainResult<&LotAssignment> {
        self.check_pick(assignment, picked_qty)?;
        let a = self.assignment_mut(assignment)?;
        a.released_qty = a.qty - picked_qty;
        a.picked = true;
        a.picked_qty = picked_qty;
        a.picker = Some(picker);
        a.picked_at = Some(at);
        a.movement = movement;
        Ok(&*a)
    }

    /// Drop an item's unpicked assignments, returning them for release.
    pub fn detach_unpicked(&mut self, item: ProposalItemId) -> DomainResult<Vec<LotAssignment>> {
        if !self.state.is_open() {
            return Err(DomainError::state(format!(
                "proposal for {} is {:?}",
                self.request_folio, self.state
            )));
        }
        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == item)
            .ok_or_else(|| DomainError::not_found(format!("proposal item {item}")))?;
        let (detached, kept): (Vec<_>, Vec<_>) = item
            .assignments
            .drain(..)
            .partition(|a| a.outstanding() > 0);
        item.assignments = kept;
        Ok(detached)
    }

    /// Attach a fresh plan to an item after [`Proposal::detach_unpicked`].
    pub fn reallocate_item(&mut self, item: ProposalItemId, plan: &LinePlan) -> DomainResult<&ProposalItem> {
        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == item)
            .ok_or_else(|| DomainError::not_found(format!("proposal item {item}")))?;
        if item.assignments.iter().any(|a| a.outstanding() > 0) {
            return Err(DomainError::state(format!(
                "item {} still holds reservations",
                item.product
            )));
        }
        item.apply_plan(plan)?;
        self.revision += 1;
        Ok(&*item)
    }

    pub fn complete(&mut self, actor: ActorId, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_state(ProposalState::Reviewed)?;
        if !self.all_picked() {
            return Err(DomainError::state(format!(
                "proposal for {} has unpicked assignments",
                self.request_folio
            )));
        }
        self.state = ProposalState::Completed;
        self.completed_by = Some(actor);
        self.completed_at = Some(at);
        Ok(())
    }

    /// Close an open proposal, returning the reservations to hand back.
    fn close(&mut self, to: ProposalState, reason: Option<String>) -> DomainResult<Vec<LotAssignment>> {
        if !self.state.is_open() {
            return Err(DomainError::state(format!(
                "proposal for {} is already {:?}",
                self.request_folio, self.state
            )));
        }
        let released = self.outstanding();
        for a in self.items.iter_mut().flat_map(|i| i.assignments.iter_mut()) {
            if !a.picked {
                a.released_qty = a.qty;
            }
        }
        self.state = to;
        self.cancel_reason = reason;
        Ok(released)
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> DomainResult<Vec<LotAssignment>> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::validation("a cancellation reason is required"));
        }
        let released = self.close(ProposalState::Cancelled, Some(reason))?;
        self.revision += 1;
        Ok(released)
    }

    /// Regeneration is only possible before any pick.
    pub fn supersede(&mut self) -> DomainResult<Vec<LotAssignment>> {
        if self.assignments().any(|a| a.picked) {
            return Err(DomainError::state(format!(
                "proposal for {} already has picks",
                self.request_folio
            )));
        }
        self.close(ProposalState::Superseded, None)
    }

    /// Total assigned per product: picked quantities plus live reservations.
    pub fn assigned_for(&self, product: &ProductCode) -> i64 {
        self.items
            .iter()
            .filter(|i| &i.product == product)
            .map(ProposalItem::committed_qty)
            .sum()
    }
}

/// Event: one proposal item was planned again after its reservations were released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReallocated {
    pub proposal_id: ProposalId,
    pub request_id: RequestId,
    pub item: ProposalItemId,
    pub status: ItemStatus,
    pub shortfall: i64,
    pub released: Vec<AssignmentId>,
    pub assigned: Vec<AssignmentId>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: an unreviewed proposal was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalCancelled {
    pub proposal_id: ProposalId,
    pub request_id: RequestId,
    pub reason: String,
    pub released: Vec<AssignmentId>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Changes to a proposal that do not move its request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalEvent {
    ItemReallocated(ItemReallocated),
    Cancelled(ProposalCancelled),
}

impl Event for ProposalEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProposalEvent::ItemReallocated(_) => "orders.proposal.item_reallocated",
            ProposalEvent::Cancelled(_) => "orders.proposal.cancelled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProposalEvent::ItemReallocated(e) => e.occurred_at,
            ProposalEvent::Cancelled(e) => e.occurred_at,
        }
    }
}
