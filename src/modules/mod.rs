pub mod brain;
pub mod perception;
