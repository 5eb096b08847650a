use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medstock_core::{ActorId, ArrivalId, ArrivalItemId};
use medstock_events::Event;

use crate::{
    ArrivalDocument, ArrivalHeader, ArrivalItem, InvoicingData, LineAmounts, PlannedPlacement,
    ProducedLot, Stage,
};

/// Event: ArrivalCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalCreated {
    pub arrival_id: ArrivalId,
    pub folio: String,
    pub header: ArrivalHeader,
    pub items: Vec<ArrivalItem>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceptionUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceptionUpdated {
    pub arrival_id: ArrivalId,
    pub header: ArrivalHeader,
    pub items: Vec<ArrivalItem>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a stage was signed off (reception submitted, quality or supervision approved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSigned {
    pub arrival_id: ArrivalId,
    pub stage: Stage,
    pub notes: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepricedItem {
    pub item: ArrivalItemId,
    pub unit_price: rust_decimal::Decimal,
    pub amounts: LineAmounts,
}

/// Event: InvoicingSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicingSubmitted {
    pub arrival_id: ArrivalId,
    pub invoicing: InvoicingData,
    pub repriced: Vec<RepricedItem>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PlacementPlanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementPlanned {
    pub arrival_id: ArrivalId,
    pub item: ArrivalItemId,
    pub plan: Vec<PlannedPlacement>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ArrivalApproved. The store creates the listed lots in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalApproved {
    pub arrival_id: ArrivalId,
    pub folio: String,
    pub produced: Vec<ProducedLot>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ArrivalRejected. Emitted by a stage rejection or by cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalRejected {
    pub arrival_id: ArrivalId,
    pub stage: Stage,
    pub reason: String,
    /// Cancelled rather than rejected by a reviewer; the arrival is archived.
    pub cancelled: bool,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DocumentAttached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAttached {
    pub arrival_id: ArrivalId,
    pub document: ArrivalDocument,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrivalEvent {
    Created(ArrivalCreated),
    ReceptionUpdated(ReceptionUpdated),
    StageSigned(StageSigned),
    InvoicingSubmitted(InvoicingSubmitted),
    PlacementPlanned(PlacementPlanned),
    Approved(ArrivalApproved),
    Rejected(ArrivalRejected),
    DocumentAttached(DocumentAttached),
}

impl Event for ArrivalEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ArrivalEvent::Created(_) => "arrivals.arrival.created",
            ArrivalEvent::ReceptionUpdated(_) => "arrivals.arrival.reception_updated",
            ArrivalEvent::StageSigned(e) => match e.stage {
                Stage::Reception => "arrivals.arrival.reception_submitted",
                Stage::Quality => "arrivals.arrival.quality_approved",
                Stage::Supervision => "arrivals.arrival.supervision_approved",
                Stage::Invoicing | Stage::Placement => "arrivals.arrival.stage_signed",
            },
            ArrivalEvent::InvoicingSubmitted(_) => "arrivals.arrival.invoicing_submitted",
            ArrivalEvent::PlacementPlanned(_) => "arrivals.arrival.placement_planned",
            ArrivalEvent::Approved(_) => "arrivals.arrival.approved",
            ArrivalEvent::Rejected(e) if e.cancelled => "arrivals.arrival.cancelled",
            ArrivalEvent::Rejected(_) => "arrivals.arrival.rejected",
            ArrivalEvent::DocumentAttached(_) => "arrivals.arrival.document_attached",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ArrivalEvent::Created(e) => e.occurred_at,
            ArrivalEvent::ReceptionUpdated(e) => e.occurred_at,
            ArrivalEvent::StageSigned(e) => e.occurred_at,
            ArrivalEvent::InvoicingSubmitted(e) => e.occurred_at,
            ArrivalEvent::PlacementPlanned(e) => e.occurred_at,
            ArrivalEvent::Approved(e) => e.occurred_at,
            ArrivalEvent::Rejected(e) => e.occurred_at,
            ArrivalEvent::DocumentAttached(e) => e.document.attached_at,
        }
    }
}
