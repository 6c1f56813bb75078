//! Single and batch items

use crate::msg::ReqMsg;
use crate::registry::ItemId;

/// One request against one service
#[derive(Debug, Clone)]
pub struct SingleItem {
    /// Last request sent on this stream
    pub(crate) request: ReqMsg,
}

impl SingleItem {
    pub fn new(request: ReqMsg) -> Self {
        Self { request }
    }

    /// Request for one member of a batch: batch list dropped, name forced
    pub(crate) fn batch_member(batch: &ReqMsg, name: &str) -> Self {
        let mut request = batch.clone();
        request.batch.clear();
        request.name = Some(name.to_string());
        Self { request }
    }

    pub fn request(&self) -> &ReqMsg {
        &self.request
    }
}

/// Aggregate stream of a batch request
///
/// Members occupy the stream ids right after the batch stream. The batch
/// itself stays registered until its last member is gone.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub(crate) request: ReqMsg,
    /// Members in request order
    pub(crate) members: Vec<ItemId>,
    /// Members not yet removed
    pub(crate) live: usize,
}

impl BatchItem {
    pub fn new(request: ReqMsg) -> Self {
        Self {
            request,
            members: Vec::new(),
            live: 0,
        }
    }

    /// Item names requested by the batch
    pub fn names(&self) -> &[String] {
        &self.request.batch
    }

    pub fn live_members(&self) -> usize {
        self.live
    }

    /// Record a new member
    pub(crate) fn add_member(&mut self, id: ItemId) {
        self.members.push(id);
        self.live += 1;
    }

    /// Record a member removal; true once no member remains
    pub(crate) fn member_removed(&mut self) -> bool {
        self.live = self.live.saturating_sub(1);
        self.live == 0
    }
}
