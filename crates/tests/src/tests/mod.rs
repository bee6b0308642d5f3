mod poller;
mod withdraw;
