//! Order pipeline: purchase requests, FEFO pick proposals and picking.
//!
//! The request is an event-producing state machine; the proposal is the
//! planner's answer to a validated request and tracks per-assignment pick
//! progress. Reservations themselves live on lot placements and are taken by
//! the store in the same transaction that records the proposal.

pub mod fefo;
pub mod proposal;
pub mod request;

pub use fefo::{CandidatePlacement, FefoCandidate, FefoPolicy, LinePlan, PlannedPick, ordered_candidates, plan_line};
pub use proposal::{
    ItemReallocated, ItemStatus, LotAssignment, Proposal, ProposalCancelled, ProposalEvent, ProposalItem,
    ProposalState,
};
pub use request::*;
