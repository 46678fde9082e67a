mod end_to_end;
mod outbound;
mod scanning;
mod setup;
mod solvency;
mod unstuck;
