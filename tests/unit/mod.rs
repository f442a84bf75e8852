mod builder_verifier_contract;
mod message_layer;
mod podle_flow;
mod selection_distribution;
