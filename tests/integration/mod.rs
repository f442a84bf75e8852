mod cross_channel_replay;
mod happy_path;
mod maker_replacement;
mod podle_retry;
mod verifier_refusal;
