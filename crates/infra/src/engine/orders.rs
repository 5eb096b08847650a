use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument};

use medstock_auth::{Actor, Role};
use medstock_catalog::{Catalog, InstitutionKey, ProductCode};
use medstock_core::{
    AggregateRoot, AssignmentId, DomainError, DomainResult, LotId, MovementId, ProposalId,
    ProposalItemId, RequestId, WarehouseId, execute,
};
use medstock_events::{EventBus, EventEnvelope};
use medstock_lots::{LotRecord, LotState};
use medstock_orders::{
    AddLine, CandidatePlacement, CloseRequest, CreateRequest, DeliverRequest, FefoCandidate,
    FefoPolicy, FlagPartial, ItemReallocated, LineApproval, LinePlan, LotAssignment, Proposal,
    ProposalCancelled, ProposalEvent, PurchaseRequest, ReplaceProposal, RequestCommand, RequestEvent,
    RequestState, Transition, ValidateRequest, plan_line,
};

use super::{InventoryEngine, apply_all, decide, require};
use crate::store::{LotTxn, RequestRow, lock_row};

const AGGREGATE: &str = "purchase_request";
const PROPOSAL_AGGREGATE: &str = "proposal";

/// Result of picking one assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickOutcome {
    pub assignment: LotAssignment,
    /// `None` when nothing was picked.
    pub movement: Option<MovementId>,
    /// The picker reported less than was reserved; the line is now partial.
    pub partial: bool,
}

impl<B> InventoryEngine<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    #[instrument(skip_all, fields(actor = %actor.name))]
    pub fn create_request(
        &self,
        actor: &Actor,
        institution: InstitutionKey,
        warehouse: WarehouseId,
        observations: Option<String>,
    ) -> DomainResult<PurchaseRequest> {
        {
            let catalog = self.catalog()?;
            catalog.institution(&institution)?;
            if catalog.warehouse(warehouse)?.institution != institution {
                return Err(DomainError::validation(format!(
                    "warehouse {warehouse} does not belong to {institution}"
                )));
            }
        }
        let id = RequestId::new();
        let today = self.today();
        let folio = self.store.folios.next(&self.config.orders.folio_prefix, today)?;

        let mut request = PurchaseRequest::empty(id);
        let events = execute(
            &mut request,
            &RequestCommand::Create(CreateRequest {
                request_id: id,
                folio: folio.clone(),
                institution,
                warehouse,
                requested_on: today,
                observations,
                actor: actor.clone(),
                at: self.now(),
            }),
        )?;
        self.store.requests.insert(id, RequestRow::new(request.clone()))?;
        info!(%folio, request = %id, "request created");
        self.publish(id, AGGREGATE, 0, &events);
        Ok(request)
    }

    #[instrument(skip_all, fields(request = %id, product = %product, actor = %actor.name))]
    pub fn add_line(&self, actor: &Actor, id: RequestId, product: ProductCode, qty: i64) -> DomainResult<PurchaseRequest> {
        self.catalog()?.product(&product)?;
        self.request_transition(id, |at| {
            RequestCommand::AddLine(AddLine {
                product,
                qty,
                actor: actor.clone(),
                at,
            })
        })
    }

    #[instrument(skip_all, fields(request = %id, actor = %actor.name))]
    pub fn submit_request(&self, actor: &Actor, id: RequestId) -> DomainResult<PurchaseRequest> {
        self.request_transition(id, |at| RequestCommand::Submit(transition(actor, at)))
    }

    #[instrument(skip_all, fields(request = %id, actor = %actor.name))]
    pub fn reject_request(&self, actor: &Actor, id: RequestId, reason: &str) -> DomainResult<PurchaseRequest> {
        self.request_transition(id, |at| RequestCommand::Reject(close(actor, reason, at)))
    }

    #[instrument(skip_all, fields(request = %id, actor = %actor.name))]
    pub fn deliver_request(
        &self,
        actor: &Actor,
        id: RequestId,
        receiver_name: &str,
        receiver_signature: &str,
    ) -> DomainResult<PurchaseRequest> {
        self.request_transition(id, |at| {
            RequestCommand::Deliver(DeliverRequest {
                receiver_name: receiver_name.to_string(),
                receiver_signature: receiver_signature.to_string(),
                actor: actor.clone(),
                at,
            })
        })
    }

    /// Approve the request lines and generate its proposal. Every planned
    /// pick is reserved in the same transaction.
    #[instrument(skip_all, fields(request = %id, actor = %actor.name))]
    pub fn validate_request(&self, actor: &Actor, id: RequestId, approvals: Vec<LineApproval>) -> DomainResult<Proposal> {
        let row = self.store.requests.row(id)?;
        let mut row = lock_row(&row, AGGREGATE)?;

        let proposal_id = ProposalId::new();
        let at = self.now();
        let (version, events) = decide(
            &row.request,
            &RequestCommand::Validate(ValidateRequest {
                approvals,
                proposal: proposal_id,
                actor: actor.clone(),
                at,
            }),
        )?;
        let mut validated = row.request.clone();
        apply_all(&mut validated, &events);
        let lines = validated.approved_lines();

        let lot_rows = self.store.lots.rows(self.product_lots(&lines)?)?;
        let mut txn = LotTxn::lock(&lot_rows)?;
        let plans = self.allocate(&mut txn, &validated, &lines)?;
        let proposal = Proposal::from_plans(proposal_id, id, validated.folio(), &plans, actor.id, at)?;
        txn.commit()?;

        row.request = validated;
        row.put_proposal(proposal.clone());
        drop(row);

        info!(
            proposal = %proposal_id,
            shortfall = proposal.has_shortfall(),
            "request validated; proposal generated"
        );
        self.publish(id, AGGREGATE, version, &events);
        Ok(proposal)
    }

    /// Replace the current proposal with a fresh FEFO run. The old proposal
    /// must have no picks; its reservations are released first.
    #[instrument(skip_all, fields(request = %id, actor = %actor.name))]
    pub fn regenerate_proposal(&self, actor: &Actor, id: RequestId) -> DomainResult<Proposal> {
        let row = self.store.requests.row(id)?;
        let mut row = lock_row(&row, AGGREGATE)?;

        let proposal_id = ProposalId::new();
        let at = self.now();
        let (version, events) = decide(
            &row.request,
            &RequestCommand::ReplaceProposal(ReplaceProposal {
                proposal: proposal_id,
                actor: actor.clone(),
                at,
            }),
        )?;

        let mut previous = row.current()?.clone();
        let released = if previous.state.is_open() {
            previous.supersede()?
        } else {
            Vec::new()
        };

        let lines = row.request.approved_lines();
        let mut lots = self.product_lots(&lines)?;
        lots.extend(released.iter().map(|a| a.lot_id));
        let lot_rows = self.store.lots.rows(lots)?;
        let mut txn = LotTxn::lock(&lot_rows)?;
        release_all(&mut txn, &released)?;
        let plans = self.allocate(&mut txn, &row.request, &lines)?;
        let proposal = Proposal::from_plans(proposal_id, id, row.request.folio(), &plans, actor.id, at)?;
        txn.commit()?;

        apply_all(&mut row.request, &events);
        row.put_proposal(previous);
        row.put_proposal(proposal.clone());
        drop(row);

        info!(proposal = %proposal_id, released = released.len(), "proposal regenerated");
        self.publish(id, AGGREGATE, version, &events);
        Ok(proposal)
    }

    /// Confirm the proposal and move the request into preparation.
    #[instrument(skip_all, fields(request = %id, actor = %actor.name))]
    pub fn review_proposal(&self, actor: &Actor, id: RequestId, accept_partial: bool) -> DomainResult<Proposal> {
        let row = self.store.requests.row(id)?;
        let mut row = lock_row(&row, AGGREGATE)?;

        let at = self.now();
        let (version, events) = decide(
            &row.request,
            &RequestCommand::StartPreparation(transition(actor, at)),
        )?;
        let mut proposal = row.current()?.clone();
        proposal.review(actor.id, at, accept_partial)?;

        apply_all(&mut row.request, &events);
        row.put_proposal(proposal.clone());
        drop(row);

        info!(proposal = %proposal.id, partial = proposal.partial_accepted, "proposal reviewed");
        self.publish(id, AGGREGATE, version, &events);
        Ok(proposal)
    }

    /// Release an item's unpicked reservations and run FEFO again for what
    /// the line still needs.
    #[instrument(skip_all, fields(request = %id, item = %item, actor = %actor.name))]
    pub fn reallocate_item(&self, actor: &Actor, id: RequestId, item: ProposalItemId) -> DomainResult<Proposal> {
        require(actor, &Role::DISPATCHER)?;
        let row = self.store.requests.row(id)?;
        let mut row = lock_row(&row, AGGREGATE)?;
        let request = &row.request;
        if !matches!(
            request.state(),
            RequestState::Validated | RequestState::InPreparation
        ) {
            return Err(DomainError::state(format!(
                "request {} is {:?}",
                request.folio(),
                request.state()
            )));
        }

        let mut proposal = row.current()?.clone();
        let revision = proposal.revision;
        let detached = proposal.detach_unpicked(item)?;
        let current = proposal
            .item(item)
            .ok_or_else(|| DomainError::not_found(format!("proposal item {item}")))?;
        let product = current.product.clone();
        let need = current.remaining_need();

        let mut lots = self.product_lots(&[(product.clone(), need)])?;
        lots.extend(detached.iter().map(|a| a.lot_id));
        let lot_rows = self.store.lots.rows(lots)?;
        let mut txn = LotTxn::lock(&lot_rows)?;
        release_all(&mut txn, &detached)?;
        let plans = self.allocate(&mut txn, &row.request, &[(product, need)])?;
        let plan = plans
            .first()
            .ok_or_else(|| DomainError::state("reallocation produced no plan"))?;
        let proposal_id = proposal.id;
        let reallocated = proposal.reallocate_item(item, plan)?;
        let event = ProposalEvent::ItemReallocated(ItemReallocated {
            proposal_id,
            request_id: id,
            item,
            status: reallocated.status,
            shortfall: reallocated.shortfall,
            released: detached.iter().map(|a| a.id).collect(),
            assigned: reallocated.assignments.iter().map(|a| a.id).collect(),
            actor: actor.id,
            occurred_at: self.now(),
        });
        txn.commit()?;

        row.put_proposal(proposal.clone());
        drop(row);

        info!(proposal = %proposal.id, released = detached.len(), "proposal item reallocated");
        self.publish(proposal.id, PROPOSAL_AGGREGATE, revision, &[event]);
        Ok(proposal)
    }

    /// Consume one assignment's reservation for the quantity actually picked.
    ///
    /// Picking less than assigned releases the rest and flags the request
    /// line as partial; the request stays in preparation.
    #[instrument(skip_all, fields(request = %id, assignment = %assignment, actor = %actor.name))]
    pub fn pick_item(
        &self,
        actor: &Actor,
        id: RequestId,
        assignment: AssignmentId,
        picked_qty: i64,
    ) -> DomainResult<PickOutcome> {
        require(actor, &Role::PICKER)?;
        let row = self.store.requests.row(id)?;
        let mut row = lock_row(&row, AGGREGATE)?;
        if row.request.state() != RequestState::InPreparation {
            return Err(DomainError::state(format!(
                "request {} is {:?}, expected InPreparation",
                row.request.folio(),
                row.request.state()
            )));
        }

        let mut proposal = row.current()?.clone();
        let target = proposal.check_pick(assignment, picked_qty)?.clone();
        let product = proposal
            .item(target.item)
            .map(|i| i.product.clone())
            .ok_or_else(|| DomainError::not_found(format!("proposal item {}", target.item)))?;

        let lot_rows = self.store.lots.rows([target.lot_id])?;
        let mut txn = LotTxn::lock(&lot_rows)?;
        let at = self.now();
        let stamp = self.store.stamp(at, actor.id);
        let consumption = txn.draft(target.lot_id)?.consume(
            target.placement,
            target.outstanding(),
            picked_qty,
            row.request.folio(),
            stamp,
        )?;
        let picked = proposal
            .record_pick(assignment, picked_qty, actor.id, at, consumption.movement)?
            .clone();

        let partial = picked.is_short();
        let (version, events) = if partial {
            decide(
                &row.request,
                &RequestCommand::FlagPartial(FlagPartial {
                    product,
                    reason: format!(
                        "picked {} of {} from lot {}",
                        picked.picked_qty, picked.qty, picked.lot_number
                    ),
                    at,
                }),
            )?
        } else {
            (row.request.version(), Vec::new())
        };
        txn.commit()?;

        apply_all(&mut row.request, &events);
        row.put_proposal(proposal);
        drop(row);

        info!(
            lot = %picked.lot_number,
            picked = consumption.picked,
            released = consumption.released,
            "assignment picked"
        );
        self.publish(id, AGGREGATE, version, &events);
        Ok(PickOutcome {
            assignment: picked,
            movement: consumption.movement,
            partial,
        })
    }

    /// Close the picked proposal and mark the request prepared.
    #[instrument(skip_all, fields(request = %id, actor = %actor.name))]
    pub fn finalise_proposal(&self, actor: &Actor, id: RequestId) -> DomainResult<Proposal> {
        let row = self.store.requests.row(id)?;
        let mut row = lock_row(&row, AGGREGATE)?;

        let at = self.now();
        let (version, events) = decide(&row.request, &RequestCommand::MarkPrepared(transition(actor, at)))?;
        let mut proposal = row.current()?.clone();
        proposal.complete(actor.id, at)?;

        apply_all(&mut row.request, &events);
        row.put_proposal(proposal.clone());
        drop(row);

        info!(proposal = %proposal.id, "proposal completed; request prepared");
        self.publish(id, AGGREGATE, version, &events);
        Ok(proposal)
    }

    /// Cancel a proposal that has not been reviewed yet and release its
    /// reservations. The request stays validated, ready to regenerate.
    #[instrument(skip_all, fields(request = %id, actor = %actor.name))]
    pub fn cancel_proposal(&self, actor: &Actor, id: RequestId, reason: &str) -> DomainResult<Proposal> {
        require(actor, &Role::VALIDATOR)?;
        let row = self.store.requests.row(id)?;
        let mut row = lock_row(&row, AGGREGATE)?;
        if row.request.state() != RequestState::Validated {
            return Err(DomainError::state(format!(
                "request {} is {:?}; cancel the request instead",
                row.request.folio(),
                row.request.state()
            )));
        }

        let mut proposal = row.current()?.clone();
        let revision = proposal.revision;
        let released = proposal.cancel(reason)?;
        let lot_rows = self.store.lots.rows(released.iter().map(|a| a.lot_id))?;
        let mut txn = LotTxn::lock(&lot_rows)?;
        release_all(&mut txn, &released)?;
        txn.commit()?;

        row.put_proposal(proposal.clone());
        drop(row);

        info!(proposal = %proposal.id, released = released.len(), "proposal cancelled");
        let event = ProposalEvent::Cancelled(ProposalCancelled {
            proposal_id: proposal.id,
            request_id: id,
            reason: reason.to_string(),
            released: released.iter().map(|a| a.id).collect(),
            actor: actor.id,
            occurred_at: self.now(),
        });
        self.publish(proposal.id, PROPOSAL_AGGREGATE, revision, &[event]);
        Ok(proposal)
    }

    /// Cancel the request from any open state. Outstanding reservations are
    /// released; movements already written by picks stay.
    #[instrument(skip_all, fields(request = %id, actor = %actor.name))]
    pub fn cancel_request(&self, actor: &Actor, id: RequestId, reason: &str) -> DomainResult<PurchaseRequest> {
        let row = self.store.requests.row(id)?;
        let mut row = lock_row(&row, AGGREGATE)?;

        let at = self.now();
        let (version, events) = decide(&row.request, &RequestCommand::Cancel(close(actor, reason, at)))?;

        let mut open: Vec<Proposal> = row
            .proposals
            .iter()
            .filter(|p| p.state.is_open())
            .cloned()
            .collect();
        let mut released = Vec::new();
        for proposal in &mut open {
            released.extend(proposal.cancel(reason)?);
        }
        let lot_rows = self.store.lots.rows(released.iter().map(|a| a.lot_id))?;
        let mut txn = LotTxn::lock(&lot_rows)?;
        release_all(&mut txn, &released)?;
        txn.commit()?;

        apply_all(&mut row.request, &events);
        for proposal in open {
            row.put_proposal(proposal);
        }
        let snapshot = row.request.clone();
        drop(row);

        info!(folio = snapshot.folio(), released = released.len(), "request cancelled");
        self.publish(id, AGGREGATE, version, &events);
        Ok(snapshot)
    }

    pub fn request(&self, id: RequestId) -> DomainResult<PurchaseRequest> {
        Ok(self.store.requests.snapshot(id)?.request)
    }

    /// Current proposal of a request, with per-item status and pick progress.
    pub fn proposal_status(&self, id: RequestId) -> DomainResult<Proposal> {
        self.store.requests.snapshot(id)?.current().cloned()
    }

    /// Every proposal generated for a request, oldest first.
    pub fn proposal_history(&self, id: RequestId) -> DomainResult<Vec<Proposal>> {
        Ok(self.store.requests.snapshot(id)?.proposals)
    }

    fn request_transition(
        &self,
        id: RequestId,
        command: impl FnOnce(DateTime<Utc>) -> RequestCommand,
    ) -> DomainResult<PurchaseRequest> {
        let row = self.store.requests.row(id)?;
        let (version, events, snapshot) = {
            let mut row = lock_row(&row, AGGREGATE)?;
            let version = row.request.version();
            let events = execute(&mut row.request, &command(self.now()))?;
            (version, events, row.request.clone())
        };
        let moved = events.iter().any(|e| {
            matches!(
                e,
                RequestEvent::Moved(_) | RequestEvent::Closed(_) | RequestEvent::Delivered(_)
            )
        });
        if moved {
            info!(folio = snapshot.folio(), state = ?snapshot.state(), "request transitioned");
        }
        self.publish(id, AGGREGATE, version, &events);
        Ok(snapshot)
    }

    fn product_lots(&self, lines: &[(ProductCode, i64)]) -> DomainResult<BTreeSet<LotId>> {
        let mut lots = BTreeSet::new();
        for (product, _) in lines {
            lots.extend(self.store.lots.ids_for_product(product)?);
        }
        Ok(lots)
    }

    /// FEFO-plan every line against the locked lots and reserve each pick.
    fn allocate(
        &self,
        txn: &mut LotTxn<'_>,
        request: &PurchaseRequest,
        lines: &[(ProductCode, i64)],
    ) -> DomainResult<Vec<LinePlan>> {
        let institution = request
            .institution()
            .cloned()
            .ok_or_else(|| DomainError::state("request has no institution"))?;
        let warehouse = request
            .warehouse()
            .ok_or_else(|| DomainError::state("request has no warehouse"))?;
        let policy = FefoPolicy {
            today: self.today(),
            near_expiry_days: self.config.orders.near_expiry_days,
        };

        let mut plans = Vec::with_capacity(lines.len());
        for (product, qty) in lines {
            let candidates = {
                let catalog = self.catalog()?;
                let ids: Vec<LotId> = txn.ids().collect();
                let mut candidates = Vec::new();
                for lot in ids {
                    let record = txn.get(lot)?;
                    if &record.lot.product == product && record.lot.warehouse == warehouse {
                        candidates.push(fefo_candidate(record, &catalog));
                    }
                }
                candidates
            };
            let plan = plan_line(product, &institution, *qty, &candidates, &policy);
            for pick in &plan.picks {
                txn.draft(pick.lot_id)?.reserve(pick.placement, pick.qty)?;
            }
            debug!(
                product = %product,
                requested = qty,
                allocated = plan.allocated(),
                shortfall = plan.shortfall,
                "line planned"
            );
            plans.push(plan);
        }
        Ok(plans)
    }
}

/// Planner view of a lot: free quantity on its active bins.
pub(super) fn fefo_candidate(record: &LotRecord, catalog: &Catalog) -> FefoCandidate {
    let placements = record
        .placements
        .iter()
        .filter_map(|p| {
            let bin = catalog.bin(p.bin).ok().filter(|b| b.active)?;
            Some(CandidatePlacement {
                placement: p.id,
                bin: p.bin,
                bin_code: bin.code.clone(),
                free: p.free_qty(),
            })
        })
        .collect();
    FefoCandidate {
        lot_id: record.lot.id,
        lot_number: record.lot.number.clone(),
        product: record.lot.product.clone(),
        institution: record.lot.institution.clone(),
        pickable: record.lot.state == LotState::Available,
        expiry: record.lot.expiry,
        received_on: record.lot.received_on,
        placements,
    }
}

fn release_all(txn: &mut LotTxn<'_>, assignments: &[LotAssignment]) -> DomainResult<()> {
    for a in assignments {
        let qty = a.outstanding();
        if qty > 0 {
            txn.draft(a.lot_id)?.release(a.placement, qty)?;
        }
    }
    Ok(())
}

fn transition(actor: &Actor, at: DateTime<Utc>) -> Transition {
    Transition {
        actor: actor.clone(),
        at,
    }
}

fn close(actor: &Actor, reason: &str, at: DateTime<Utc>) -> CloseRequest {
    CloseRequest {
        reason: reason.to_string(),
        actor: actor.clone(),
        at,
    }
}
