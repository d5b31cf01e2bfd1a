pub mod amqp;
pub mod db;
