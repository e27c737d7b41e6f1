mod resolve;
mod scenarios;
